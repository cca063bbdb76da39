use serde::Serialize;
use serde_json::Value;

use super::completion::Completion;

/// Result of checking one prerequisite.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPoll {
    Pending,
    Ready(Value),
    /// Terminal; the gate never retries a failed task.
    Failed(String),
}

/// A single asynchronous prerequisite. The underlying operation is started
/// when the task is built; `poll` only observes it and must not block.
pub trait AsyncTask {
    /// Key under which the task's payload appears in the resolved data.
    fn label(&self) -> &str;

    fn poll(&mut self) -> TaskPoll;
}

/// Task backed by a [`Completion`] settled by a provider.
#[derive(Debug)]
pub struct CompletionTask<T> {
    label: String,
    completion: Completion<T>,
}

impl<T> CompletionTask<T> {
    pub fn new(label: impl Into<String>, completion: Completion<T>) -> Self {
        Self {
            label: label.into(),
            completion,
        }
    }
}

impl<T: Clone + Serialize> AsyncTask for CompletionTask<T> {
    fn label(&self) -> &str {
        &self.label
    }

    fn poll(&mut self) -> TaskPoll {
        match self.completion.peek() {
            None => TaskPoll::Pending,
            Some(Ok(value)) => match serde_json::to_value(value) {
                Ok(value) => TaskPoll::Ready(value),
                Err(err) => TaskPoll::Failed(format!("malformed payload: {err}")),
            },
            Some(Err(reason)) => TaskPoll::Failed(reason),
        }
    }
}

/// Task that is ready on its first poll, for values already known at setup.
#[derive(Debug, Clone)]
pub struct ValueTask {
    label: String,
    value: Value,
}

impl ValueTask {
    pub fn new(label: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        Self {
            label: label.into(),
            value,
        }
    }
}

impl AsyncTask for ValueTask {
    fn label(&self) -> &str {
        &self.label
    }

    fn poll(&mut self) -> TaskPoll {
        TaskPoll::Ready(self.value.clone())
    }
}

/// Cheap readiness check polled for as long as it takes, e.g. "has the
/// library published its global yet". Never fails on its own.
pub struct ConditionTask {
    label: String,
    check: Box<dyn FnMut() -> bool>,
}

impl ConditionTask {
    pub fn new(label: impl Into<String>, check: impl FnMut() -> bool + 'static) -> Self {
        Self {
            label: label.into(),
            check: Box::new(check),
        }
    }
}

impl AsyncTask for ConditionTask {
    fn label(&self) -> &str {
        &self.label
    }

    fn poll(&mut self) -> TaskPoll {
        if (self.check)() {
            TaskPoll::Ready(Value::Bool(true))
        } else {
            TaskPoll::Pending
        }
    }
}

impl std::fmt::Debug for ConditionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionTask").field("label", &self.label).finish()
    }
}
