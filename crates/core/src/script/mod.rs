//! Process-wide deduplication of external script loads.
//!
//! The first request for a url starts the load; every later request, whether
//! made while the load is in flight or after it settled, observes the same
//! outcome. Failed loads are not retried.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::gate::{completion, AsyncTask, Completion, Settled, TaskPoll};
use crate::providers::ResourceProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStatus {
    Loading,
    Loaded,
    Failed,
}

fn status_of(completion: &Completion<()>) -> ScriptStatus {
    match completion.peek() {
        None => ScriptStatus::Loading,
        Some(Ok(())) => ScriptStatus::Loaded,
        Some(Err(_)) => ScriptStatus::Failed,
    }
}

struct Inner {
    provider: Rc<dyn ResourceProvider>,
    entries: RefCell<HashMap<String, Completion<()>>>,
}

/// Shared handle; clones see the same entries.
#[derive(Clone)]
pub struct ScriptLoadDeduplicator {
    inner: Rc<Inner>,
}

impl ScriptLoadDeduplicator {
    pub fn new(provider: Rc<dyn ResourceProvider>) -> Self {
        Self {
            inner: Rc::new(Inner {
                provider,
                entries: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Returns a wait handle for `url`, starting the load only if no entry
    /// exists yet.
    pub fn ensure_loaded(&self, url: &str) -> ScriptWait {
        let existing = self.inner.entries.borrow().get(url).cloned();
        if let Some(completion) = existing {
            tracing::debug!(url, status = ?status_of(&completion), "script already requested");
            return ScriptWait::new(url, completion);
        }

        let (done, signal) = completion::<()>();
        self.inner
            .entries
            .borrow_mut()
            .insert(url.to_string(), signal.clone());
        tracing::debug!(url, "loading script");
        self.inner.provider.load_script(url, done);
        ScriptWait::new(url, signal)
    }

    /// Like [`ensure_loaded`](Self::ensure_loaded), but the load of `url`
    /// only begins once `prerequisite` has loaded. A failed prerequisite
    /// fails the dependent without requesting it.
    pub fn ensure_loaded_after(&self, prerequisite: ScriptWait, url: &str) -> DependentScript {
        DependentScript {
            label: format!("script:{url}"),
            url: url.to_string(),
            prerequisite,
            scripts: self.clone(),
            started: None,
        }
    }

    pub fn status(&self, url: &str) -> Option<ScriptStatus> {
        self.inner.entries.borrow().get(url).map(status_of)
    }

    /// Number of distinct urls requested so far.
    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ScriptLoadDeduplicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptLoadDeduplicator")
            .field("urls", &self.len())
            .finish()
    }
}

/// One waiter on a deduplicated script load. Usable directly as a gate task.
#[derive(Debug, Clone)]
pub struct ScriptWait {
    label: String,
    completion: Completion<()>,
}

impl ScriptWait {
    fn new(url: &str, completion: Completion<()>) -> Self {
        Self {
            label: format!("script:{url}"),
            completion,
        }
    }

    pub fn status(&self) -> ScriptStatus {
        status_of(&self.completion)
    }

    /// Runs `callback` once the load settles, immediately if it already has.
    pub fn on_settled(&self, callback: impl FnOnce(&Settled<()>) + 'static) {
        self.completion.subscribe(callback);
    }
}

impl AsyncTask for ScriptWait {
    fn label(&self) -> &str {
        &self.label
    }

    fn poll(&mut self) -> TaskPoll {
        match self.completion.peek() {
            None => TaskPoll::Pending,
            Some(Ok(())) => TaskPoll::Ready(serde_json::Value::Null),
            Some(Err(reason)) => TaskPoll::Failed(reason),
        }
    }
}

/// Script wait that is chained behind another script.
#[derive(Debug)]
pub struct DependentScript {
    label: String,
    url: String,
    prerequisite: ScriptWait,
    scripts: ScriptLoadDeduplicator,
    started: Option<ScriptWait>,
}

impl AsyncTask for DependentScript {
    fn label(&self) -> &str {
        &self.label
    }

    fn poll(&mut self) -> TaskPoll {
        if self.started.is_none() {
            match self.prerequisite.poll() {
                TaskPoll::Pending => return TaskPoll::Pending,
                TaskPoll::Failed(reason) => {
                    return TaskPoll::Failed(format!(
                        "{} failed: {reason}",
                        self.prerequisite.label
                    ))
                }
                TaskPoll::Ready(_) => {
                    self.started = Some(self.scripts.ensure_loaded(&self.url));
                }
            }
        }
        match self.started.as_mut() {
            Some(wait) => wait.poll(),
            None => TaskPoll::Pending,
        }
    }
}
