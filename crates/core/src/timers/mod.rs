//! Cooperative timer queue driven by the host's single execution context.
//!
//! Nothing here blocks. The host advances virtual (or wall-clock derived)
//! time with [`TimerQueue::advance_to`] and every timer that has fallen due
//! runs in `(due time, creation order)`. Callbacks run while the queue is not
//! borrowed, so they are free to schedule or cancel timers, including their
//! own.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};

/// Identifier returned by the scheduling calls and accepted by
/// [`TimerQueue::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Returned by repeating callbacks to decide whether they are re-armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Again,
    Done,
}

enum Callback {
    Once(Box<dyn FnOnce()>),
    Repeating {
        interval_ms: u64,
        callback: Box<dyn FnMut() -> Repeat>,
    },
}

#[derive(Default)]
struct QueueState {
    now_ms: u64,
    next_id: u64,
    entries: BTreeMap<(u64, TimerId), Callback>,
    due_by_id: HashMap<TimerId, u64>,
    running: Option<TimerId>,
    running_cancelled: bool,
}

impl QueueState {
    fn insert(&mut self, due: u64, id: TimerId, callback: Callback) {
        self.entries.insert((due, id), callback);
        self.due_by_id.insert(id, due);
    }

    fn allocate(&mut self) -> TimerId {
        self.next_id += 1;
        TimerId(self.next_id)
    }
}

/// Shared handle to the process-scoped timer queue.
#[derive(Clone, Default)]
pub struct TimerQueue {
    state: Rc<RefCell<QueueState>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time of the queue in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.state.borrow().now_ms
    }

    /// Number of timers that are armed and have not run yet.
    pub fn pending(&self) -> usize {
        self.state.borrow().entries.len()
    }

    /// Runs `callback` once, `delay_ms` after the current time.
    pub fn schedule(&self, delay_ms: u64, callback: impl FnOnce() + 'static) -> TimerId {
        let mut state = self.state.borrow_mut();
        let id = state.allocate();
        let due = state.now_ms.saturating_add(delay_ms);
        state.insert(due, id, Callback::Once(Box::new(callback)));
        id
    }

    /// Runs `callback` every `interval_ms` until it returns [`Repeat::Done`]
    /// or the timer is cancelled. The first run happens one interval from now.
    /// A zero interval is treated as one millisecond so the queue always
    /// makes progress.
    pub fn schedule_repeating(
        &self,
        interval_ms: u64,
        callback: impl FnMut() -> Repeat + 'static,
    ) -> TimerId {
        let interval_ms = interval_ms.max(1);
        let mut state = self.state.borrow_mut();
        let id = state.allocate();
        let due = state.now_ms.saturating_add(interval_ms);
        state.insert(
            due,
            id,
            Callback::Repeating {
                interval_ms,
                callback: Box::new(callback),
            },
        );
        id
    }

    /// Cancels a timer. Returns `false` when the timer already ran to
    /// completion or was cancelled before.
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut state = self.state.borrow_mut();
        if let Some(due) = state.due_by_id.remove(&id) {
            state.entries.remove(&(due, id));
            return true;
        }
        if state.running == Some(id) && !state.running_cancelled {
            state.running_cancelled = true;
            return true;
        }
        false
    }

    pub fn advance_by(&self, delta_ms: u64) {
        let target = self.now_ms().saturating_add(delta_ms);
        self.advance_to(target);
    }

    /// Runs every timer due at or before `target_ms`, then moves the clock to
    /// `target_ms`. Moving backwards is a no-op. Must not be called from
    /// inside a timer callback.
    pub fn advance_to(&self, target_ms: u64) {
        if self.state.borrow().running.is_some() {
            tracing::debug!(target_ms, "ignoring re-entrant timer advance");
            return;
        }

        loop {
            let (id, callback) = {
                let mut state = self.state.borrow_mut();
                let Some(&(due, id)) = state.entries.keys().next() else {
                    break;
                };
                if due > target_ms {
                    break;
                }
                let Some(callback) = state.entries.remove(&(due, id)) else {
                    break;
                };
                state.due_by_id.remove(&id);
                state.now_ms = state.now_ms.max(due);
                state.running = Some(id);
                state.running_cancelled = false;
                (id, callback)
            };

            match callback {
                Callback::Once(callback) => callback(),
                Callback::Repeating {
                    interval_ms,
                    mut callback,
                } => {
                    let repeat = callback();
                    let mut state = self.state.borrow_mut();
                    if repeat == Repeat::Again && !state.running_cancelled {
                        let due = state.now_ms.saturating_add(interval_ms);
                        state.insert(
                            due,
                            id,
                            Callback::Repeating {
                                interval_ms,
                                callback,
                            },
                        );
                    }
                }
            }

            let mut state = self.state.borrow_mut();
            state.running = None;
            state.running_cancelled = false;
        }

        let mut state = self.state.borrow_mut();
        state.now_ms = state.now_ms.max(target_ms);
    }

    pub fn downgrade(&self) -> WeakTimerQueue {
        WeakTimerQueue {
            state: Rc::downgrade(&self.state),
        }
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("TimerQueue")
            .field("now_ms", &state.now_ms)
            .field("pending", &state.entries.len())
            .finish()
    }
}

/// Non-owning handle used by guards that must not keep the queue alive.
#[derive(Clone, Default)]
pub struct WeakTimerQueue {
    state: Weak<RefCell<QueueState>>,
}

impl WeakTimerQueue {
    pub fn upgrade(&self) -> Option<TimerQueue> {
        self.state.upgrade().map(|state| TimerQueue { state })
    }
}

impl fmt::Debug for WeakTimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakTimerQueue").finish()
    }
}
