use std::sync::Arc;

use crate::controller::{EventKind, InstanceState};

/// Result alias that carries the custom [`OverlayError`] type.
pub type Result<T> = std::result::Result<T, OverlayError>;

/// Common error type for the core crate.
///
/// Lifecycle failures never escape the instance they belong to. The
/// non-fatal members of the taxonomy are reported through
/// [`Outcome::Ignored`](crate::Outcome::Ignored) and the logs rather than
/// returned as `Err`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OverlayError {
    /// A prerequisite (network fetch, script load, geocode) failed or ran out
    /// of polling attempts. The owning instance degrades to no-render.
    #[error("resource `{task}` unavailable: {reason}")]
    ResourceUnavailable { task: String, reason: String },
    /// The named container root is absent from the host page.
    #[error("target element `{target}` is not present in the page")]
    MissingTarget { target: String },
    /// `teardown` was invoked on an instance that is already torn down.
    #[error("instance has already been torn down")]
    DuplicateTeardown,
    /// An event that has no effect in the current state, such as `end`
    /// without a visible `start`.
    #[error("`{event}` has no effect while the instance is {state}")]
    OutOfOrderEvent {
        event: EventKind,
        state: InstanceState,
    },
    /// A configuration field failed validation.
    #[error("invalid option `{field}`: {reason}")]
    InvalidOption { field: String, reason: String },
    /// Free-form message for collaborator failures that carry no structure.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors. Shared so the error stays
    /// cloneable across instances.
    #[error("io: {0}")]
    Io(#[source] Arc<std::io::Error>),
    /// Wrapper around JSON (de)serialisation errors.
    #[error("json: {0}")]
    Json(#[source] Arc<serde_json::Error>),
}

impl PartialEq for OverlayError {
    fn eq(&self, other: &Self) -> bool {
        use OverlayError::*;
        match (self, other) {
            (
                ResourceUnavailable { task, reason },
                ResourceUnavailable {
                    task: other_task,
                    reason: other_reason,
                },
            ) => task == other_task && reason == other_reason,
            (MissingTarget { target }, MissingTarget { target: other }) => target == other,
            (DuplicateTeardown, DuplicateTeardown) => true,
            (
                OutOfOrderEvent { event, state },
                OutOfOrderEvent {
                    event: other_event,
                    state: other_state,
                },
            ) => event == other_event && state == other_state,
            (
                InvalidOption { field, reason },
                InvalidOption {
                    field: other_field,
                    reason: other_reason,
                },
            ) => field == other_field && reason == other_reason,
            (Message(a), Message(b)) => a == b,
            (Io(a), Io(b)) => a.kind() == b.kind() && a.to_string() == b.to_string(),
            (Json(a), Json(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

impl OverlayError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceUnavailable {
            task: task.into(),
            reason: reason.into(),
        }
    }
}

impl From<&str> for OverlayError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for OverlayError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<std::io::Error> for OverlayError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<serde_json::Error> for OverlayError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(Arc::new(value))
    }
}
