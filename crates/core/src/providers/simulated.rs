use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Coordinate, ResourceProvider};
use crate::gate::Completer;
use crate::host::MemoryPage;
use crate::timers::TimerQueue;

/// Canned answer for one simulated request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulatedResponse {
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub body: Value,
    /// When set the request fails with this reason.
    #[serde(default)]
    pub error: Option<String>,
    /// Script responses only: global published on the page once loaded.
    #[serde(default)]
    pub defines_global: Option<String>,
}

impl SimulatedResponse {
    pub fn ok(delay_ms: u64, body: Value) -> Self {
        Self {
            delay_ms,
            body,
            ..Self::default()
        }
    }

    pub fn failed(delay_ms: u64, reason: impl Into<String>) -> Self {
        Self {
            delay_ms,
            error: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Response tables keyed by script url, resource url and place name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulatedResponses {
    #[serde(default)]
    pub scripts: HashMap<String, SimulatedResponse>,
    #[serde(default)]
    pub resources: HashMap<String, SimulatedResponse>,
    #[serde(default)]
    pub places: HashMap<String, SimulatedResponse>,
}

/// Provider that answers from [`SimulatedResponses`] after the configured
/// delay on the timer queue. Requests without a canned answer fail on the
/// next tick.
pub struct SimulatedProvider {
    timers: TimerQueue,
    responses: SimulatedResponses,
    page: Option<Rc<MemoryPage>>,
    requests: RefCell<Vec<String>>,
}

impl SimulatedProvider {
    pub fn new(timers: TimerQueue) -> Self {
        Self::from_responses(timers, SimulatedResponses::default())
    }

    pub fn from_responses(timers: TimerQueue, responses: SimulatedResponses) -> Self {
        Self {
            timers,
            responses,
            page: None,
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Page on which loaded scripts publish their globals.
    pub fn with_page(mut self, page: Rc<MemoryPage>) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_script(mut self, url: impl Into<String>, response: SimulatedResponse) -> Self {
        self.responses.scripts.insert(url.into(), response);
        self
    }

    pub fn with_resource(mut self, url: impl Into<String>, response: SimulatedResponse) -> Self {
        self.responses.resources.insert(url.into(), response);
        self
    }

    pub fn with_place(mut self, place: impl Into<String>, response: SimulatedResponse) -> Self {
        self.responses.places.insert(place.into(), response);
        self
    }

    /// Every request made so far, as `kind:key`.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    pub fn request_count(&self, request: &str) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|made| made.as_str() == request)
            .count()
    }

    fn record(&self, kind: &str, key: &str) {
        tracing::debug!(kind, key, "simulated request");
        self.requests.borrow_mut().push(format!("{kind}:{key}"));
    }

    fn respond<T: Clone + 'static>(
        &self,
        response: Option<&SimulatedResponse>,
        missing: String,
        done: Completer<T>,
        decode: impl FnOnce(Value) -> Result<T, String> + 'static,
    ) {
        let Some(response) = response.cloned() else {
            self.timers.schedule(0, move || {
                done.fail(missing);
            });
            return;
        };

        let page = self.page.clone();
        self.timers.schedule(response.delay_ms, move || {
            if let Some(reason) = response.error {
                done.fail(reason);
                return;
            }
            if let (Some(page), Some(global)) = (page, response.defines_global) {
                page.define_global(global);
            }
            done.complete(decode(response.body));
        });
    }
}

impl ResourceProvider for SimulatedProvider {
    fn load_script(&self, url: &str, done: Completer<()>) {
        self.record("script", url);
        self.respond(
            self.responses.scripts.get(url),
            format!("failed to load script {url}"),
            done,
            |_| Ok(()),
        );
    }

    fn fetch_resource(&self, url: &str, done: Completer<Value>) {
        self.record("resource", url);
        self.respond(
            self.responses.resources.get(url),
            format!("network error fetching {url}"),
            done,
            Ok,
        );
    }

    fn geocode(&self, place: &str, done: Completer<Coordinate>) {
        self.record("place", place);
        self.respond(
            self.responses.places.get(place),
            format!("no geocoding result for {place}"),
            done,
            |body| {
                serde_json::from_value(body).map_err(|err| format!("malformed response: {err}"))
            },
        );
    }
}

impl std::fmt::Debug for SimulatedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedProvider")
            .field("requests", &self.requests.borrow().len())
            .finish()
    }
}
