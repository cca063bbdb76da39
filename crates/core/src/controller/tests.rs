use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Value};

use super::*;
use crate::gate::{completion, Completer, CompletionTask, ValueTask};
use crate::host::MemoryPage;

#[derive(Default)]
struct RecordingAdapter {
    calls: RefCell<Vec<(String, u64)>>,
    clock: RefCell<Option<TimerQueue>>,
}

impl RecordingAdapter {
    fn timed(timers: &TimerQueue) -> Rc<Self> {
        let adapter = Rc::new(Self::default());
        *adapter.clock.borrow_mut() = Some(timers.clone());
        adapter
    }

    fn record(&self, call: &str) {
        let now = self.clock.borrow().as_ref().map_or(0, TimerQueue::now_ms);
        self.calls.borrow_mut().push((call.to_string(), now));
    }

    fn calls(&self) -> Vec<(String, u64)> {
        self.calls.borrow().clone()
    }
}

impl RenderAdapter for RecordingAdapter {
    fn render(&self, container: &Container, _data: &ResolvedData) -> Result<()> {
        assert!(container.is_renderable());
        self.record("render");
        Ok(())
    }

    fn dispose(&self, _container: &Container) -> Result<()> {
        self.record("dispose");
        Ok(())
    }
}

struct Harness {
    timers: TimerQueue,
    page: Rc<MemoryPage>,
    registry: ContainerRegistry,
    adapter: Rc<RecordingAdapter>,
    next_id: u64,
}

impl Harness {
    fn new(elements: &[&str]) -> Self {
        let timers = TimerQueue::new();
        let page = Rc::new(MemoryPage::with_elements(elements.iter().copied()));
        Self {
            adapter: RecordingAdapter::timed(&timers),
            registry: ContainerRegistry::new(page.clone()),
            page,
            timers,
            next_id: 0,
        }
    }

    fn controller(&mut self) -> InstanceController {
        self.next_id += 1;
        InstanceController::new(
            InstanceId(self.next_id),
            PluginKind::Map,
            self.adapter.clone(),
            self.registry.clone(),
        )
    }

    fn request(target: &str, container: &str, tasks: Vec<Box<dyn AsyncTask>>) -> SetupRequest {
        SetupRequest {
            target_id: target.to_string(),
            container: ContainerRequest::Shared(container.to_string()),
            class: "leaflet-plugin".to_string(),
            tasks,
            seed: ResolvedData::default(),
            policy: PollPolicy {
                interval_ms: 10,
                max_attempts: None,
            },
        }
    }

    /// Sets up an instance gated on one task settled later by the caller.
    fn pending_instance(&mut self, target: &str, container: &str) -> (InstanceController, Completer<Value>) {
        let (done, signal) = completion::<Value>();
        let controller = self.controller();
        let tasks: Vec<Box<dyn AsyncTask>> = vec![Box::new(CompletionTask::new("script:lib.js", signal))];
        controller.setup(&self.timers, Self::request(target, container, tasks));
        (controller, done)
    }
}

fn at(at_ms: u64) -> EventPayload {
    EventPayload { at_ms }
}

fn render_calls(adapter: &RecordingAdapter) -> usize {
    adapter.calls().iter().filter(|(call, _)| call == "render").count()
}

#[test]
fn script_gated_map_renders_at_resolution_and_disposes_at_end() {
    let mut harness = Harness::new(&["map"]);
    let timers = harness.timers.clone();
    let (done, signal) = completion::<Value>();
    timers.schedule(150, move || {
        done.succeed(Value::Null);
    });
    let controller = harness.controller();
    let tasks: Vec<Box<dyn AsyncTask>> = vec![Box::new(CompletionTask::new("script:lib.js", signal))];
    controller.setup(&timers, Harness::request("map", "m1", tasks));

    assert_eq!(controller.start(at(0)), Outcome::Queued);
    assert!(harness.adapter.calls().is_empty());

    timers.schedule(4_000, {
        let controller = controller.clone();
        move || {
            assert_eq!(controller.end(at(4_000)), Outcome::Disposed);
        }
    });
    timers.advance_to(5_000);

    assert_eq!(
        harness.adapter.calls(),
        vec![("render".to_string(), 150), ("dispose".to_string(), 4_000)]
    );
    assert_eq!(controller.state(), InstanceState::Inactive);

    let node = controller.container().and_then(|c| c.node()).unwrap();
    assert_eq!(controller.teardown(), Outcome::TornDown);
    assert!(!harness.page.is_attached(node));
    assert_eq!(timers.pending(), 0);
}

#[test]
fn missing_target_accepts_events_without_rendering() {
    let mut harness = Harness::new(&[]);
    let controller = harness.controller();
    let state = controller.setup(&harness.timers, Harness::request("nowhere", "m1", Vec::new()));
    assert_eq!(state, InstanceState::Ready);
    assert!(!controller.container().unwrap().is_renderable());

    assert!(matches!(
        controller.start(at(0)),
        Outcome::Ignored(OverlayError::MissingTarget { ref target }) if target == "nowhere"
    ));
    assert!(harness.adapter.calls().is_empty());
    assert_eq!(controller.teardown(), Outcome::TornDown);
    assert_eq!(harness.page.attach_events(), 0);
    assert!(harness.registry.is_empty());
}

#[test]
fn start_then_end_before_ready_never_renders() {
    let mut harness = Harness::new(&["map"]);
    let (controller, done) = harness.pending_instance("map", "m1");

    assert_eq!(controller.start(at(0)), Outcome::Queued);
    assert_eq!(controller.end(at(30)), Outcome::Coalesced);
    assert!(controller.queued().is_empty());

    done.succeed(Value::Null);
    harness.timers.advance_by(100);
    assert_eq!(controller.state(), InstanceState::Ready);
    assert_eq!(controller.render_count(), 0);
    assert!(harness.adapter.calls().is_empty());
}

#[test]
fn repeated_starts_while_pending_render_once() {
    let mut harness = Harness::new(&["map"]);
    let (controller, done) = harness.pending_instance("map", "m1");

    controller.start(at(0));
    controller.start(at(5));
    assert_eq!(controller.queued().len(), 1);

    harness.timers.advance_to(40);
    done.succeed(Value::Null);
    harness.timers.advance_to(50);

    assert_eq!(controller.state(), InstanceState::Active);
    assert_eq!(render_calls(&harness.adapter), 1);
    assert_eq!(harness.adapter.calls()[0].1, 50);
}

#[test]
fn end_queued_before_start_replays_in_order() {
    let mut harness = Harness::new(&["map"]);
    let (controller, done) = harness.pending_instance("map", "m1");

    assert_eq!(controller.end(at(0)), Outcome::Queued);
    assert_eq!(controller.start(at(10)), Outcome::Queued);
    done.succeed(Value::Null);
    harness.timers.advance_by(10);

    assert_eq!(controller.state(), InstanceState::Active);
    assert_eq!(render_calls(&harness.adapter), 1);
    assert_eq!(controller.dispose_count(), 0);
}

#[test]
fn duplicate_start_and_end_are_idempotent() {
    let mut harness = Harness::new(&["map"]);
    let controller = harness.controller();
    controller.setup(&harness.timers, Harness::request("map", "m1", Vec::new()));

    assert_eq!(controller.start(at(0)), Outcome::Rendered);
    assert!(matches!(controller.start(at(1)), Outcome::Ignored(_)));
    assert_eq!(controller.end(at(2)), Outcome::Disposed);
    assert!(matches!(controller.end(at(3)), Outcome::Ignored(_)));
    assert_eq!(controller.start(at(4)), Outcome::Rendered);

    assert_eq!(controller.render_count(), 2);
    assert_eq!(controller.dispose_count(), 1);
}

#[test]
fn failed_gate_degrades_silently() {
    let mut harness = Harness::new(&["map"]);
    let (controller, done) = harness.pending_instance("map", "m1");
    controller.start(at(0));

    done.fail("HTTP 404");
    harness.timers.advance_by(10);

    assert_eq!(controller.state(), InstanceState::Inactive);
    assert_eq!(controller.gate_status(), Some(GateStatus::Failed));
    assert!(controller.queued().is_empty());
    assert!(matches!(
        controller.failure(),
        Some(OverlayError::ResourceUnavailable { ref task, .. }) if task == "script:lib.js"
    ));

    assert!(matches!(controller.start(at(20)), Outcome::Ignored(_)));
    assert!(matches!(controller.end(at(30)), Outcome::Ignored(_)));
    assert!(harness.adapter.calls().is_empty());
    assert_eq!(controller.teardown(), Outcome::TornDown);
}

#[test]
fn teardown_is_idempotent_and_stops_polling() {
    let mut harness = Harness::new(&["map"]);
    let (controller, _done) = harness.pending_instance("map", "m1");
    assert_eq!(harness.timers.pending(), 1);

    assert_eq!(controller.teardown(), Outcome::TornDown);
    assert_eq!(harness.timers.pending(), 0);
    let first = controller.snapshot();

    assert_eq!(controller.teardown(), Outcome::Ignored(OverlayError::DuplicateTeardown));
    let second = controller.snapshot();
    assert_eq!(first.state, second.state);
    assert_eq!(first.disposes, second.disposes);
    assert_eq!(harness.page.attached_count(), 0);
    assert!(harness.registry.is_empty());
}

#[test]
fn teardown_while_active_disposes_then_releases() {
    let mut harness = Harness::new(&["map"]);
    let controller = harness.controller();
    controller.setup(&harness.timers, Harness::request("map", "m1", Vec::new()));
    controller.start(at(0));

    controller.teardown();
    assert_eq!(controller.dispose_count(), 1);
    assert_eq!(harness.adapter.calls().last().map(|(call, _)| call.as_str()), Some("dispose"));
    assert!(harness.registry.is_empty());

    assert!(matches!(controller.start(at(10)), Outcome::Ignored(_)));
    assert_eq!(render_calls(&harness.adapter), 1);
}

#[test]
fn instances_sharing_a_container_detach_it_once() {
    let mut harness = Harness::new(&["feed"]);
    let first = harness.controller();
    let second = harness.controller();
    first.setup(&harness.timers, Harness::request("feed", "timelineDiv1", Vec::new()));
    second.setup(&harness.timers, Harness::request("feed", "timelineDiv1", Vec::new()));

    let node = first.container().and_then(|c| c.node()).unwrap();
    assert_eq!(second.container().and_then(|c| c.node()), Some(node));

    first.teardown();
    assert!(harness.page.is_attached(node));
    second.teardown();
    assert!(!harness.page.is_attached(node));
    assert_eq!(harness.page.detach_events(node), 1);
}

#[test]
fn seed_is_merged_into_rendered_data() {
    struct Capture(RefCell<Option<ResolvedData>>);
    impl RenderAdapter for Capture {
        fn render(&self, _container: &Container, data: &ResolvedData) -> Result<()> {
            *self.0.borrow_mut() = Some(data.clone());
            Ok(())
        }
        fn dispose(&self, _container: &Container) -> Result<()> {
            Ok(())
        }
    }

    let harness = Harness::new(&["map"]);
    let capture = Rc::new(Capture(RefCell::new(None)));
    let controller = InstanceController::new(
        InstanceId(7),
        PluginKind::Map,
        capture.clone(),
        harness.registry.clone(),
    );
    let mut request = Harness::request("map", "m1", vec![Box::new(ValueTask::new("center", json!([51.0, -1.5])))]);
    request.seed.insert("options", json!({"zoom": 2}));
    controller.setup(&harness.timers, request);
    controller.start(at(0));

    let data = capture.0.borrow().clone().unwrap();
    assert_eq!(data.get("options"), Some(&json!({"zoom": 2})));
    assert_eq!(data.get("center"), Some(&json!([51.0, -1.5])));
}

#[test]
fn adapter_errors_stay_inside_the_instance() {
    struct Failing;
    impl RenderAdapter for Failing {
        fn render(&self, _container: &Container, _data: &ResolvedData) -> Result<()> {
            Err(OverlayError::msg("canvas unavailable"))
        }
        fn dispose(&self, _container: &Container) -> Result<()> {
            Err(OverlayError::msg("already gone"))
        }
    }

    let harness = Harness::new(&["map"]);
    let controller =
        InstanceController::new(InstanceId(1), PluginKind::Map, Rc::new(Failing), harness.registry.clone());
    controller.setup(&harness.timers, Harness::request("map", "m1", Vec::new()));

    assert_eq!(controller.start(at(0)), Outcome::Rendered);
    assert_eq!(controller.end(at(1)), Outcome::Disposed);
    assert_eq!(controller.teardown(), Outcome::TornDown);
}

#[test]
fn adapter_may_tear_down_from_inside_render() {
    struct SelfClosing(RefCell<Option<InstanceController>>);
    impl RenderAdapter for SelfClosing {
        fn render(&self, _container: &Container, _data: &ResolvedData) -> Result<()> {
            if let Some(controller) = self.0.borrow().as_ref() {
                controller.teardown();
            }
            Ok(())
        }
        fn dispose(&self, _container: &Container) -> Result<()> {
            Ok(())
        }
    }

    let harness = Harness::new(&["map"]);
    let adapter = Rc::new(SelfClosing(RefCell::new(None)));
    let controller =
        InstanceController::new(InstanceId(1), PluginKind::Map, adapter.clone(), harness.registry.clone());
    *adapter.0.borrow_mut() = Some(controller.clone());
    controller.setup(&harness.timers, Harness::request("map", "m1", Vec::new()));

    assert_eq!(controller.start(at(0)), Outcome::Rendered);
    assert_eq!(controller.state(), InstanceState::TornDown);
    adapter.0.borrow_mut().take();
    assert!(harness.registry.is_empty());
}

#[test]
fn dropping_the_last_handle_releases_the_container() {
    let mut harness = Harness::new(&["map"]);
    let (controller, _done) = harness.pending_instance("map", "m1");
    assert_eq!(harness.registry.len(), 1);

    drop(controller);
    assert!(harness.registry.is_empty());
    assert_eq!(harness.timers.pending(), 0);
}

#[test]
fn second_setup_is_ignored() {
    let mut harness = Harness::new(&["map"]);
    let controller = harness.controller();
    controller.setup(&harness.timers, Harness::request("map", "m1", Vec::new()));
    controller.setup(&harness.timers, Harness::request("map", "m2", Vec::new()));

    assert_eq!(harness.registry.refcount("map", "m1"), 1);
    assert_eq!(harness.registry.refcount("map", "m2"), 0);
}
