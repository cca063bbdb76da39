mod simulated;

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gate::{completion, AsyncTask, Completer, CompletionTask, ConditionTask};
use crate::host::HostPage;

pub use simulated::{SimulatedProvider, SimulatedResponse, SimulatedResponses};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

/// Starts asynchronous work and settles the completer when it is done.
/// Implementations must not block and must settle each completer at most
/// once; a completer that is never settled leaves its task pending.
pub trait ResourceProvider {
    fn load_script(&self, url: &str, done: Completer<()>);

    fn fetch_resource(&self, url: &str, done: Completer<Value>);

    fn geocode(&self, place: &str, done: Completer<Coordinate>);
}

/// Starts a fetch and returns the task observing it.
pub fn fetch_task(
    provider: &dyn ResourceProvider,
    label: impl Into<String>,
    url: &str,
) -> Box<dyn AsyncTask> {
    let (done, signal) = completion::<Value>();
    provider.fetch_resource(url, done);
    Box::new(CompletionTask::new(label, signal))
}

/// Starts a geocode lookup and returns the task observing it.
pub fn geocode_task(
    provider: &dyn ResourceProvider,
    label: impl Into<String>,
    place: &str,
) -> Box<dyn AsyncTask> {
    let (done, signal) = completion::<Coordinate>();
    provider.geocode(place, done);
    Box::new(CompletionTask::new(label, signal))
}

/// Waits for a library to publish its global object on the page.
pub fn global_check(host: Rc<dyn HostPage>, name: &str) -> Box<dyn AsyncTask> {
    let global = name.to_string();
    Box::new(ConditionTask::new(format!("global:{name}"), move || {
        host.global_defined(&global)
    }))
}
