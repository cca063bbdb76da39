//! Reference-counted registry of on-screen container regions.
//!
//! Shared containers are keyed by `(target id, container id)`. The first
//! reservation of a key creates the node, later reservations share it, and
//! the node is detached by the release that brings the count back to zero.
//! Nodes the registry did not create are never detached by it.
//!
//! Containers with a generated id are exclusive to one instance: their id
//! skips every id already in use under the target, and no shared
//! reservation ever joins or adopts them.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::host::{HostPage, NodeId};
use crate::OverlayError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerKey {
    pub target_id: String,
    pub container_id: String,
}

impl fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} #{}", self.target_id, self.container_id)
    }
}

/// How an instance wants its container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerRequest {
    /// Join (or create) the container with this id. Instances naming the same
    /// id under the same target share one node.
    Shared(String),
    /// A fresh container of its own, with an id generated from `prefix`.
    Exclusive { prefix: String },
}

/// A reserved region. Placeholders (returned when the target is missing)
/// have no node and are never rendered into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    key: ContainerKey,
    node: Option<NodeId>,
    ticket: Option<u64>,
}

impl Container {
    pub fn key(&self) -> &ContainerKey {
        &self.key
    }

    pub fn target_id(&self) -> &str {
        &self.key.target_id
    }

    pub fn container_id(&self) -> &str {
        &self.key.container_id
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn is_renderable(&self) -> bool {
        self.node.is_some()
    }

    pub fn is_exclusive(&self) -> bool {
        self.ticket.is_some()
    }
}

/// One acquisition of a container. Each lease is released at most once; a
/// second release is a no-op.
#[derive(Debug)]
pub struct ContainerLease {
    container: Container,
    released: Cell<bool>,
}

impl ContainerLease {
    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn is_released(&self) -> bool {
        self.released.get()
    }
}

/// Process-scoped monotonic counters for human-readable container ids,
/// one sequence per prefix.
#[derive(Debug, Default)]
pub struct ContainerIds {
    counters: HashMap<String, u64>,
}

impl ContainerIds {
    pub fn next(&mut self, prefix: &str) -> String {
        let counter = self.counters.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        format!("{prefix}{counter}")
    }
}

#[derive(Debug)]
struct Entry {
    node: NodeId,
    refcount: usize,
    owned_by_registry: bool,
}

#[derive(Debug, Default)]
struct RegistryState {
    shared: HashMap<ContainerKey, Entry>,
    exclusive: HashMap<u64, (ContainerKey, NodeId)>,
    next_ticket: u64,
    ids: ContainerIds,
}

impl RegistryState {
    fn id_in_use(&self, target_id: &str, container_id: &str) -> bool {
        let matches =
            |key: &ContainerKey| key.target_id == target_id && key.container_id == container_id;
        self.shared.keys().any(matches) || self.exclusive.values().any(|(key, _)| matches(key))
    }

    fn is_exclusive_node(&self, node: NodeId) -> bool {
        self.exclusive.values().any(|(_, held)| *held == node)
    }
}

/// Shared handle to the registry. Cloning is cheap and every clone sees the
/// same entries.
#[derive(Clone)]
pub struct ContainerRegistry {
    host: Rc<dyn HostPage>,
    state: Rc<RefCell<RegistryState>>,
}

impl ContainerRegistry {
    pub fn new(host: Rc<dyn HostPage>) -> Self {
        Self {
            host,
            state: Rc::new(RefCell::new(RegistryState::default())),
        }
    }

    pub fn host(&self) -> &Rc<dyn HostPage> {
        &self.host
    }

    pub fn acquire(&self, target_id: &str, request: &ContainerRequest, class: &str) -> ContainerLease {
        match request {
            ContainerRequest::Shared(container_id) => self.reserve(target_id, container_id, class),
            ContainerRequest::Exclusive { prefix } => self.reserve_exclusive(target_id, prefix, class),
        }
    }

    /// Reserves the shared container for `(target_id, container_id)`.
    ///
    /// Never fails: a missing target yields a detached placeholder that
    /// renders nothing.
    pub fn reserve(&self, target_id: &str, container_id: &str, class: &str) -> ContainerLease {
        let key = ContainerKey {
            target_id: target_id.to_string(),
            container_id: container_id.to_string(),
        };
        let mut state = self.state.borrow_mut();

        if let Some(entry) = state.shared.get_mut(&key) {
            entry.refcount += 1;
            tracing::debug!(container = %key, refcount = entry.refcount, "sharing container");
            let node = Some(entry.node);
            return lease(key, node, None);
        }

        if !self.host.contains(target_id) {
            return missing_target(key);
        }

        let adoptable = self
            .host
            .find_child(target_id, container_id)
            .filter(|node| !state.is_exclusive_node(*node));
        let (node, owned_by_registry) = match adoptable {
            Some(node) => (node, false),
            None => match self.host.create_child(target_id, container_id, class) {
                Some(node) => (node, true),
                None => {
                    tracing::warn!(container = %key, "host refused to create container");
                    return lease(key, None, None);
                }
            },
        };

        tracing::debug!(container = %key, owned_by_registry, "created container entry");
        state.shared.insert(
            key.clone(),
            Entry {
                node,
                refcount: 1,
                owned_by_registry,
            },
        );
        lease(key, Some(node), None)
    }

    /// Creates a container only the caller uses, named `{prefix}{n}` with
    /// the first `n` whose id is free both in the registry and in the page.
    pub fn reserve_exclusive(&self, target_id: &str, prefix: &str, class: &str) -> ContainerLease {
        let mut state = self.state.borrow_mut();
        if !self.host.contains(target_id) {
            let container_id = state.ids.next(prefix);
            return missing_target(ContainerKey {
                target_id: target_id.to_string(),
                container_id,
            });
        }

        let container_id = loop {
            let candidate = state.ids.next(prefix);
            if !state.id_in_use(target_id, &candidate)
                && self.host.find_child(target_id, &candidate).is_none()
            {
                break candidate;
            }
            tracing::debug!(container_id = %candidate, "generated id already taken; skipping");
        };
        let key = ContainerKey {
            target_id: target_id.to_string(),
            container_id,
        };

        let Some(node) = self.host.create_child(target_id, &key.container_id, class) else {
            tracing::warn!(container = %key, "host refused to create container");
            return lease(key, None, None);
        };
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        state.exclusive.insert(ticket, (key.clone(), node));
        tracing::debug!(container = %key, "created exclusive container");
        lease(key, Some(node), Some(ticket))
    }

    /// Releases one acquisition. Returns `true` when this release detached
    /// the node from the page.
    pub fn release(&self, lease: &ContainerLease) -> bool {
        if lease.released.replace(true) {
            tracing::debug!(container = %lease.container.key, "lease already released");
            return false;
        }
        if lease.container.node.is_none() {
            return false;
        }

        let key = &lease.container.key;
        let mut state = self.state.borrow_mut();
        if let Some(ticket) = lease.container.ticket {
            let Some((_, node)) = state.exclusive.remove(&ticket) else {
                return false;
            };
            drop(state);
            self.host.remove(node);
            tracing::debug!(container = %key, "detached exclusive container");
            return true;
        }

        let Some(entry) = state.shared.get_mut(key) else {
            return false;
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount > 0 {
            return false;
        }

        let Some(entry) = state.shared.remove(key) else {
            return false;
        };
        drop(state);
        if entry.owned_by_registry {
            self.host.remove(entry.node);
            tracing::debug!(container = %key, "detached container");
            true
        } else {
            false
        }
    }

    /// Current reference count of a shared key; zero when there is no entry.
    pub fn refcount(&self, target_id: &str, container_id: &str) -> usize {
        let key = ContainerKey {
            target_id: target_id.to_string(),
            container_id: container_id.to_string(),
        };
        self.state
            .borrow()
            .shared
            .get(&key)
            .map_or(0, |entry| entry.refcount)
    }

    /// Number of live containers, shared and exclusive.
    pub fn len(&self) -> usize {
        let state = self.state.borrow();
        state.shared.len() + state.exclusive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ContainerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

fn lease(key: ContainerKey, node: Option<NodeId>, ticket: Option<u64>) -> ContainerLease {
    ContainerLease {
        container: Container { key, node, ticket },
        released: Cell::new(false),
    }
}

fn missing_target(key: ContainerKey) -> ContainerLease {
    let err = OverlayError::MissingTarget {
        target: key.target_id.clone(),
    };
    tracing::warn!(container = %key, "{err}; using a placeholder");
    lease(key, None, None)
}
