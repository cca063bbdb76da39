//! Readiness gate over one or more asynchronous prerequisites.
//!
//! A gate leaves `Pending` exactly once. All tasks succeeding makes it
//! `Ready`; the first task failure (or running out of polling attempts) makes
//! it `Failed`. After that every poll returns the same status.

mod completion;
mod task;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;

use crate::timers::{Repeat, TimerId, TimerQueue, WeakTimerQueue};
use crate::OverlayError;

pub use completion::{completion, Completer, Completion, Settled};
pub use task::{AsyncTask, CompletionTask, ConditionTask, TaskPoll, ValueTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pending,
    Ready,
    Failed,
}

impl GateStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// How often a waiting gate is rechecked and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval_ms: u64,
    /// `None` polls until the gate settles or the watch is cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 50,
            max_attempts: None,
        }
    }
}

/// Payloads of every task of a ready gate, keyed by task label.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedData {
    values: BTreeMap<String, Value>,
}

impl ResolvedData {
    pub fn get(&self, label: &str) -> Option<&Value> {
        self.values.get(label)
    }

    pub fn insert(&mut self, label: impl Into<String>, value: Value) {
        self.values.insert(label.into(), value);
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

struct TaskSlot {
    task: Box<dyn AsyncTask>,
    done: bool,
}

struct GateState {
    status: GateStatus,
    tasks: Vec<TaskSlot>,
    resolved: ResolvedData,
    failure: Option<OverlayError>,
    attempts_remaining: Option<u32>,
}

impl GateState {
    fn poll(&mut self) -> GateStatus {
        if self.status.is_terminal() {
            return self.status;
        }

        let mut all_done = true;
        for slot in self.tasks.iter_mut().filter(|slot| !slot.done) {
            match slot.task.poll() {
                TaskPoll::Pending => all_done = false,
                TaskPoll::Ready(value) => {
                    slot.done = true;
                    self.resolved.insert(slot.task.label(), value);
                }
                TaskPoll::Failed(reason) => {
                    self.status = GateStatus::Failed;
                    self.failure = Some(OverlayError::unavailable(slot.task.label(), reason));
                    return self.status;
                }
            }
        }

        if all_done {
            self.status = GateStatus::Ready;
        }
        self.status
    }

    /// Counts one recheck against the attempt budget, failing the gate when
    /// the budget is spent.
    fn spend_attempt(&mut self) -> GateStatus {
        let status = self.poll();
        if status.is_terminal() {
            return status;
        }
        if let Some(remaining) = self.attempts_remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                let task = self
                    .tasks
                    .iter()
                    .find(|slot| !slot.done)
                    .map_or("gate", |slot| slot.task.label())
                    .to_string();
                self.status = GateStatus::Failed;
                self.failure = Some(OverlayError::unavailable(
                    task,
                    "gave up waiting after the polling budget ran out",
                ));
            }
        }
        self.status
    }
}

/// Readiness barrier owned by exactly one overlay instance.
pub struct ResourceGate {
    state: Rc<RefCell<GateState>>,
}

impl ResourceGate {
    /// Wraps already launched tasks. A gate with no tasks is ready on its
    /// first poll.
    pub fn open(tasks: Vec<Box<dyn AsyncTask>>) -> Self {
        let tasks = tasks
            .into_iter()
            .map(|task| TaskSlot { task, done: false })
            .collect();
        Self {
            state: Rc::new(RefCell::new(GateState {
                status: GateStatus::Pending,
                tasks,
                resolved: ResolvedData::default(),
                failure: None,
                attempts_remaining: None,
            })),
        }
    }

    pub fn status(&self) -> GateStatus {
        self.state.borrow().status
    }

    /// Non-blocking check of every outstanding task.
    pub fn poll(&self) -> GateStatus {
        self.state.borrow_mut().poll()
    }

    pub fn resolved(&self) -> Option<ResolvedData> {
        let state = self.state.borrow();
        (state.status == GateStatus::Ready).then(|| state.resolved.clone())
    }

    pub fn failure(&self) -> Option<OverlayError> {
        self.state.borrow().failure.clone()
    }

    /// Rechecks the gate every `policy.interval_ms` until it settles, then
    /// invokes exactly one of the callbacks. If the gate has already settled
    /// the callback runs before this returns and no timer is armed.
    pub fn await_resolution(
        &self,
        timers: &TimerQueue,
        policy: PollPolicy,
        on_ready: impl FnOnce(ResolvedData) + 'static,
        on_failed: impl FnOnce(OverlayError) + 'static,
    ) -> GateWatch {
        match self.poll() {
            GateStatus::Ready => {
                let data = self.state.borrow().resolved.clone();
                on_ready(data);
                return GateWatch::settled();
            }
            GateStatus::Failed => {
                let err = self.failure().unwrap_or_else(|| OverlayError::msg("gate failed"));
                on_failed(err);
                return GateWatch::settled();
            }
            GateStatus::Pending => {}
        }

        let state = self.state.clone();
        state.borrow_mut().attempts_remaining = policy.max_attempts;
        let mut on_ready = Some(on_ready);
        let mut on_failed = Some(on_failed);

        let timer = timers.schedule_repeating(policy.interval_ms, move || {
            let status = state.borrow_mut().spend_attempt();
            match status {
                GateStatus::Pending => Repeat::Again,
                GateStatus::Ready => {
                    let data = state.borrow().resolved.clone();
                    if let Some(on_ready) = on_ready.take() {
                        on_ready(data);
                    }
                    Repeat::Done
                }
                GateStatus::Failed => {
                    let err = state
                        .borrow()
                        .failure
                        .clone()
                        .unwrap_or_else(|| OverlayError::msg("gate failed"));
                    if let Some(on_failed) = on_failed.take() {
                        on_failed(err);
                    }
                    Repeat::Done
                }
            }
        });

        GateWatch {
            timer: Some(timer),
            timers: timers.downgrade(),
        }
    }
}

impl fmt::Debug for ResourceGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ResourceGate")
            .field("status", &state.status)
            .field("tasks", &state.tasks.len())
            .finish()
    }
}

/// Cancellable handle to the polling timer of a waiting gate. Dropping the
/// watch cancels the timer.
#[derive(Debug, Default)]
pub struct GateWatch {
    timer: Option<TimerId>,
    timers: WeakTimerQueue,
}

impl GateWatch {
    fn settled() -> Self {
        Self::default()
    }

    /// Stops polling. Returns `true` if a live timer was cancelled.
    pub fn cancel(&mut self) -> bool {
        match (self.timer.take(), self.timers.upgrade()) {
            (Some(timer), Some(timers)) => timers.cancel(timer),
            _ => false,
        }
    }
}

impl Drop for GateWatch {
    fn drop(&mut self) {
        self.cancel();
    }
}
