use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// Opaque handle to a node created in (or adopted from) the host page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

/// The narrow set of element operations the overlays need from the page.
pub trait HostPage {
    /// Whether a live element with this id exists in the page.
    fn contains(&self, element_id: &str) -> bool;

    /// Looks up an element with `child_id` directly below `target_id`.
    fn find_child(&self, target_id: &str, child_id: &str) -> Option<NodeId>;

    /// Creates and attaches a new element below `target_id`. Returns `None`
    /// when the target is not present.
    fn create_child(&self, target_id: &str, child_id: &str, class: &str) -> Option<NodeId>;

    /// Detaches and discards a node. Returns `false` if it was already gone.
    fn remove(&self, node: NodeId) -> bool;

    /// Whether a library has published its global object yet.
    fn global_defined(&self, name: &str) -> bool;
}

#[derive(Debug, Clone)]
struct MemoryNode {
    parent: String,
    id: String,
    class: String,
}

#[derive(Debug, Default)]
struct PageState {
    roots: HashSet<String>,
    nodes: HashMap<NodeId, MemoryNode>,
    globals: HashSet<String>,
    next_node: u64,
    attached: usize,
    detached: HashMap<NodeId, usize>,
}

impl PageState {
    fn attach(&mut self, parent: &str, id: &str, class: &str) -> NodeId {
        self.next_node += 1;
        let node = NodeId(self.next_node);
        self.nodes.insert(
            node,
            MemoryNode {
                parent: parent.to_string(),
                id: id.to_string(),
                class: class.to_string(),
            },
        );
        self.attached += 1;
        node
    }
}

/// In-memory page: a flat set of root elements, each holding child nodes.
#[derive(Debug, Default)]
pub struct MemoryPage {
    state: RefCell<PageState>,
}

impl MemoryPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_elements<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let page = Self::new();
        for id in ids {
            page.add_element(id);
        }
        page
    }

    pub fn add_element(&self, id: impl Into<String>) {
        self.state.borrow_mut().roots.insert(id.into());
    }

    pub fn define_global(&self, name: impl Into<String>) {
        self.state.borrow_mut().globals.insert(name.into());
    }

    /// Places a pre-existing child element in the page, the way page markup
    /// would before any overlay runs.
    pub fn insert_child(&self, target_id: &str, child_id: &str) -> Option<NodeId> {
        let mut state = self.state.borrow_mut();
        if !state.roots.contains(target_id) {
            return None;
        }
        Some(state.attach(target_id, child_id, ""))
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        self.state.borrow().nodes.contains_key(&node)
    }

    /// Ids of the nodes currently attached below `target_id`, in creation order.
    pub fn children_of(&self, target_id: &str) -> Vec<String> {
        let state = self.state.borrow();
        let mut children: Vec<_> = state
            .nodes
            .iter()
            .filter(|(_, node)| node.parent == target_id)
            .map(|(id, node)| (*id, node.id.clone()))
            .collect();
        children.sort();
        children.into_iter().map(|(_, id)| id).collect()
    }

    pub fn class_of(&self, node: NodeId) -> Option<String> {
        self.state.borrow().nodes.get(&node).map(|n| n.class.clone())
    }

    pub fn attached_count(&self) -> usize {
        self.state.borrow().nodes.len()
    }

    /// Total number of nodes ever created through [`HostPage::create_child`]
    /// or [`MemoryPage::insert_child`].
    pub fn attach_events(&self) -> usize {
        self.state.borrow().attached
    }

    /// How many times `node` was detached. Anything above one is a bug.
    pub fn detach_events(&self, node: NodeId) -> usize {
        self.state
            .borrow()
            .detached
            .get(&node)
            .copied()
            .unwrap_or(0)
    }
}

impl HostPage for MemoryPage {
    fn contains(&self, element_id: &str) -> bool {
        self.state.borrow().roots.contains(element_id)
    }

    fn find_child(&self, target_id: &str, child_id: &str) -> Option<NodeId> {
        self.state
            .borrow()
            .nodes
            .iter()
            .find(|(_, node)| node.parent == target_id && node.id == child_id)
            .map(|(id, _)| *id)
    }

    fn create_child(&self, target_id: &str, child_id: &str, class: &str) -> Option<NodeId> {
        let mut state = self.state.borrow_mut();
        if !state.roots.contains(target_id) {
            return None;
        }
        Some(state.attach(target_id, child_id, class))
    }

    fn remove(&self, node: NodeId) -> bool {
        let mut state = self.state.borrow_mut();
        *state.detached.entry(node).or_insert(0) += 1;
        state.nodes.remove(&node).is_some()
    }

    fn global_defined(&self, name: &str) -> bool {
        self.state.borrow().globals.contains(name)
    }
}
