//! Per-instance lifecycle state machine.
//!
//! `setup → (start | end)* → teardown` arrive from the timeline at times it
//! controls. While the instance's gate is pending, `start` and `end` are
//! queued and coalesced; once the gate settles they are replayed in arrival
//! order. `teardown` is accepted in every state and is idempotent.
//!
//! Render adapter calls are made with no internal borrow held, so an adapter
//! may call back into the controller (for example to tear it down).

mod queue;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::gate::{GateStatus, GateWatch, PollPolicy, ResolvedData, ResourceGate};
use crate::gate::AsyncTask;
use crate::plugins::PluginKind;
use crate::registry::{Container, ContainerLease, ContainerRegistry, ContainerRequest};
use crate::timers::TimerQueue;
use crate::{OverlayError, Result};

pub use queue::{PendingEvent, PendingQueue};

/// Plugin-supplied rendering. Both calls must tolerate repeats and must not
/// fail just because the container is a placeholder.
pub trait RenderAdapter {
    fn render(&self, container: &Container, data: &ResolvedData) -> Result<()>;

    fn dispose(&self, container: &Container) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Idle,
    SettingUp,
    Ready,
    Active,
    Inactive,
    TornDown,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::SettingUp => "setting up",
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::TornDown => "torn down",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Setup,
    Start,
    End,
    Teardown,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Setup => "setup",
            Self::Start => "start",
            Self::End => "end",
            Self::Teardown => "teardown",
        })
    }
}

/// Data the timeline attaches to `start` and `end`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Playback time at which the timeline fired the event.
    pub at_ms: u64,
}

/// What a lifecycle call did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Rendered,
    Disposed,
    /// Held until the gate settles.
    Queued,
    /// Cancelled a queued `start` that never became visible.
    Coalesced,
    TornDown,
    /// Accepted without effect; the error says why.
    Ignored(OverlayError),
}

/// Everything needed to bring an instance from `Idle` to `SettingUp`.
pub struct SetupRequest {
    pub target_id: String,
    pub container: ContainerRequest,
    pub class: String,
    /// Already started prerequisites.
    pub tasks: Vec<Box<dyn AsyncTask>>,
    /// Entries merged into the gate's resolved data, such as the options.
    pub seed: ResolvedData,
    pub policy: PollPolicy,
}

/// Serializable view of an instance for reports.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub kind: PluginKind,
    pub target_id: String,
    pub container_id: String,
    pub state: InstanceState,
    pub gate: Option<GateStatus>,
    pub renders: usize,
    pub disposes: usize,
    pub queued: usize,
    pub failure: Option<String>,
}

struct Instance {
    state: InstanceState,
    target_id: String,
    container_id: String,
    pending: PendingQueue,
    gate: Option<ResourceGate>,
    watch: Option<GateWatch>,
    lease: Option<ContainerLease>,
    seed: ResolvedData,
    resolved: Option<ResolvedData>,
    failure: Option<OverlayError>,
    renders: usize,
    disposes: usize,
}

struct Shared {
    id: InstanceId,
    kind: PluginKind,
    adapter: Rc<dyn RenderAdapter>,
    registry: ContainerRegistry,
    instance: RefCell<Instance>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let instance = self.instance.get_mut();
        if let Some(lease) = instance.lease.take() {
            tracing::debug!(instance = %self.id, "dropped without teardown; releasing container");
            self.registry.release(&lease);
        }
    }
}

enum Effect {
    Render(Container, ResolvedData),
    Dispose(Container),
    Done(Outcome),
}

/// Handle to one overlay instance. Clones refer to the same instance.
#[derive(Clone)]
pub struct InstanceController {
    shared: Rc<Shared>,
}

impl InstanceController {
    pub fn new(
        id: InstanceId,
        kind: PluginKind,
        adapter: Rc<dyn RenderAdapter>,
        registry: ContainerRegistry,
    ) -> Self {
        Self {
            shared: Rc::new(Shared {
                id,
                kind,
                adapter,
                registry,
                instance: RefCell::new(Instance {
                    state: InstanceState::Idle,
                    target_id: String::new(),
                    container_id: String::new(),
                    pending: PendingQueue::default(),
                    gate: None,
                    watch: None,
                    lease: None,
                    seed: ResolvedData::default(),
                    resolved: None,
                    failure: None,
                    renders: 0,
                    disposes: 0,
                }),
            }),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.shared.id
    }

    pub fn kind(&self) -> PluginKind {
        self.shared.kind
    }

    pub fn state(&self) -> InstanceState {
        self.shared.instance.borrow().state
    }

    pub fn gate_status(&self) -> Option<GateStatus> {
        self.shared.instance.borrow().gate.as_ref().map(ResourceGate::status)
    }

    pub fn container(&self) -> Option<Container> {
        self.shared
            .instance
            .borrow()
            .lease
            .as_ref()
            .map(|lease| lease.container().clone())
    }

    pub fn render_count(&self) -> usize {
        self.shared.instance.borrow().renders
    }

    pub fn dispose_count(&self) -> usize {
        self.shared.instance.borrow().disposes
    }

    pub fn queued(&self) -> Vec<PendingEvent> {
        self.shared.instance.borrow().pending.events().to_vec()
    }

    pub fn failure(&self) -> Option<OverlayError> {
        self.shared.instance.borrow().failure.clone()
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        let instance = self.shared.instance.borrow();
        InstanceSnapshot {
            id: self.shared.id,
            kind: self.shared.kind,
            target_id: instance.target_id.clone(),
            container_id: instance.container_id.clone(),
            state: instance.state,
            gate: instance.gate.as_ref().map(ResourceGate::status),
            renders: instance.renders,
            disposes: instance.disposes,
            queued: instance.pending.len(),
            failure: instance.failure.as_ref().map(ToString::to_string),
        }
    }

    /// Reserves the container and opens the gate. Returns without waiting:
    /// if the gate is still pending a polling timer is armed on `timers`.
    pub fn setup(&self, timers: &TimerQueue, request: SetupRequest) -> InstanceState {
        let id = self.shared.id;
        let status = {
            let mut instance = self.shared.instance.borrow_mut();
            if instance.state != InstanceState::Idle {
                let err = OverlayError::OutOfOrderEvent {
                    event: EventKind::Setup,
                    state: instance.state,
                };
                tracing::debug!(instance = %id, "{err}");
                return instance.state;
            }

            let lease =
                self.shared
                    .registry
                    .acquire(&request.target_id, &request.container, &request.class);
            tracing::info!(
                instance = %id,
                kind = %self.shared.kind,
                container = %lease.container().key(),
                renderable = lease.container().is_renderable(),
                "setting up"
            );
            instance.target_id = request.target_id;
            instance.container_id = lease.container().container_id().to_string();
            instance.lease = Some(lease);
            instance.seed = request.seed;
            instance.state = InstanceState::SettingUp;

            let gate = ResourceGate::open(request.tasks);
            let status = gate.poll();
            instance.gate = Some(gate);
            status
        };

        match status {
            GateStatus::Ready | GateStatus::Failed => self.settle_from_gate(),
            GateStatus::Pending => self.arm_watch(timers, request.policy),
        }
        self.state()
    }

    fn arm_watch(&self, timers: &TimerQueue, policy: PollPolicy) {
        let ready: Weak<Shared> = Rc::downgrade(&self.shared);
        let failed = ready.clone();
        // The gate may settle inside `await_resolution`, which re-enters the
        // controller, so no borrow is held across the call.
        let Some(gate) = self.shared.instance.borrow_mut().gate.take() else {
            return;
        };
        let watch = gate.await_resolution(
            timers,
            policy,
            move |data| {
                if let Some(shared) = ready.upgrade() {
                    InstanceController { shared }.on_gate_settled(Ok(data));
                }
            },
            move |err| {
                if let Some(shared) = failed.upgrade() {
                    InstanceController { shared }.on_gate_settled(Err(err));
                }
            },
        );

        let mut instance = self.shared.instance.borrow_mut();
        if instance.state == InstanceState::TornDown {
            return;
        }
        instance.gate = Some(gate);
        if instance.state == InstanceState::SettingUp {
            instance.watch = Some(watch);
        }
    }

    /// Applies the outcome of a gate that settled synchronously during setup.
    fn settle_from_gate(&self) {
        let settled = {
            let instance = self.shared.instance.borrow();
            match instance.gate.as_ref() {
                Some(gate) => match gate.resolved() {
                    Some(data) => Ok(data),
                    None => Err(gate
                        .failure()
                        .unwrap_or_else(|| OverlayError::msg("gate failed"))),
                },
                None => return,
            }
        };
        self.on_gate_settled(settled);
    }

    fn on_gate_settled(&self, settled: std::result::Result<ResolvedData, OverlayError>) {
        let id = self.shared.id;
        let (replay, watch) = {
            let mut instance = self.shared.instance.borrow_mut();
            if instance.state != InstanceState::SettingUp {
                return;
            }
            let watch = instance.watch.take();
            match settled {
                Ok(data) => {
                    let mut resolved = instance.seed.clone();
                    for label in data.labels() {
                        if let Some(value) = data.get(label) {
                            resolved.insert(label, value.clone());
                        }
                    }
                    instance.resolved = Some(resolved);
                    instance.state = InstanceState::Ready;
                    tracing::debug!(instance = %id, queued = instance.pending.len(), "gate ready");
                    (instance.pending.drain(), watch)
                }
                Err(err) => {
                    tracing::warn!(instance = %id, "{err}; overlay will not render");
                    instance.failure = Some(err);
                    instance.state = InstanceState::Inactive;
                    instance.pending.clear();
                    (Vec::new(), watch)
                }
            }
        };
        drop(watch);

        for event in replay {
            let outcome = match event.kind {
                EventKind::Start => self.start(event.payload),
                EventKind::End => self.end(event.payload),
                EventKind::Setup | EventKind::Teardown => continue,
            };
            tracing::debug!(instance = %id, event = %event.kind, ?outcome, "replayed queued event");
        }
    }

    /// Shows the overlay, or queues the request while the gate is pending.
    pub fn start(&self, payload: EventPayload) -> Outcome {
        let id = self.shared.id;
        let effect = {
            let mut instance = self.shared.instance.borrow_mut();
            match instance.state {
                InstanceState::SettingUp => {
                    instance.pending.push_start(payload);
                    tracing::debug!(instance = %id, at_ms = payload.at_ms, "queued start");
                    Effect::Done(Outcome::Queued)
                }
                InstanceState::Ready | InstanceState::Inactive => {
                    if let Some(err) = instance.failure.clone() {
                        Effect::Done(Outcome::Ignored(err))
                    } else {
                        match (instance.lease.as_ref(), instance.resolved.as_ref()) {
                            (Some(lease), Some(data)) if lease.container().is_renderable() => {
                                let effect =
                                    Effect::Render(lease.container().clone(), data.clone());
                                instance.state = InstanceState::Active;
                                instance.renders += 1;
                                effect
                            }
                            _ => Effect::Done(Outcome::Ignored(OverlayError::MissingTarget {
                                target: instance.target_id.clone(),
                            })),
                        }
                    }
                }
                state => Effect::Done(Outcome::Ignored(OverlayError::OutOfOrderEvent {
                    event: EventKind::Start,
                    state,
                })),
            }
        };
        self.apply(effect)
    }

    /// Hides the overlay. A queued `start` is cancelled instead of being
    /// undone later.
    pub fn end(&self, payload: EventPayload) -> Outcome {
        let id = self.shared.id;
        let effect = {
            let mut instance = self.shared.instance.borrow_mut();
            match instance.state {
                InstanceState::SettingUp => {
                    if instance.pending.push_end(payload) {
                        tracing::debug!(instance = %id, at_ms = payload.at_ms, "coalesced start/end");
                        Effect::Done(Outcome::Coalesced)
                    } else {
                        tracing::debug!(instance = %id, at_ms = payload.at_ms, "queued end");
                        Effect::Done(Outcome::Queued)
                    }
                }
                InstanceState::Active => {
                    instance.state = InstanceState::Inactive;
                    instance.disposes += 1;
                    match instance.lease.as_ref() {
                        Some(lease) => Effect::Dispose(lease.container().clone()),
                        None => Effect::Done(Outcome::Disposed),
                    }
                }
                state => Effect::Done(Outcome::Ignored(OverlayError::OutOfOrderEvent {
                    event: EventKind::End,
                    state,
                })),
            }
        };
        self.apply(effect)
    }

    /// Stops gate polling, disposes visible content, releases the container.
    /// Calling it again has no further effect.
    pub fn teardown(&self) -> Outcome {
        let id = self.shared.id;
        let (was_active, watch, lease) = {
            let mut instance = self.shared.instance.borrow_mut();
            if instance.state == InstanceState::TornDown {
                return Outcome::Ignored(OverlayError::DuplicateTeardown);
            }
            let was_active = instance.state == InstanceState::Active;
            if was_active {
                instance.disposes += 1;
            }
            instance.state = InstanceState::TornDown;
            instance.pending.clear();
            instance.gate = None;
            (was_active, instance.watch.take(), instance.lease.take())
        };

        if let Some(mut watch) = watch {
            if watch.cancel() {
                tracing::debug!(instance = %id, "cancelled pending gate polling");
            }
        }
        if let Some(lease) = lease {
            if was_active {
                self.dispose(lease.container());
            }
            self.shared.registry.release(&lease);
        }
        tracing::info!(instance = %id, "torn down");
        Outcome::TornDown
    }

    fn apply(&self, effect: Effect) -> Outcome {
        match effect {
            Effect::Done(outcome) => {
                if let Outcome::Ignored(reason) = &outcome {
                    tracing::debug!(instance = %self.shared.id, "ignored: {reason}");
                }
                outcome
            }
            Effect::Render(container, data) => {
                tracing::info!(instance = %self.shared.id, container = %container.key(), "render");
                if let Err(err) = self.shared.adapter.render(&container, &data) {
                    tracing::warn!(instance = %self.shared.id, "render failed: {err}");
                }
                Outcome::Rendered
            }
            Effect::Dispose(container) => {
                self.dispose(&container);
                Outcome::Disposed
            }
        }
    }

    fn dispose(&self, container: &Container) {
        tracing::info!(instance = %self.shared.id, container = %container.key(), "dispose");
        if let Err(err) = self.shared.adapter.dispose(container) {
            tracing::warn!(instance = %self.shared.id, "dispose failed: {err}");
        }
    }
}

impl fmt::Debug for InstanceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceController")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests;
