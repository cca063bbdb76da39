use std::path::Path;
use std::rc::Rc;

use overlay_lifecycle_core::providers::SimulatedResponses;
use overlay_lifecycle_core::{
    AppConfig, Container, InstanceSnapshot, MemoryPage, OverlayOptions, OverlayRuntime,
    PlaybackClock, RenderAdapter, ResolvedData, Result, SimulatedProvider, TimelineScheduler,
    TimerQueue,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageSetup {
    /// Ids of the elements overlays may target.
    #[serde(default)]
    pub elements: Vec<String>,
    /// Globals already defined before playback starts.
    #[serde(default)]
    pub globals: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub config: AppConfig,
    #[serde(default)]
    pub page: PageSetup,
    #[serde(default)]
    pub responses: SimulatedResponses,
    pub cues: Vec<OverlayOptions>,
    /// Playback length. Defaults to the latest cue end.
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl Scenario {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.config.validate()?;
        for cue in &self.cues {
            cue.validate()?;
        }
        Ok(())
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
            .unwrap_or_else(|| self.cues.iter().map(|cue| cue.end_ms).max().unwrap_or(0))
    }
}

/// Render adapter that only logs what a real plugin would draw.
struct TraceAdapter;

impl RenderAdapter for TraceAdapter {
    fn render(&self, container: &Container, data: &ResolvedData) -> Result<()> {
        tracing::info!(
            container = %container.key(),
            labels = ?data.labels().collect::<Vec<_>>(),
            "render"
        );
        Ok(())
    }

    fn dispose(&self, container: &Container) -> Result<()> {
        tracing::info!(container = %container.key(), "dispose");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct RejectedCue {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub duration_ms: u64,
    pub instances: Vec<InstanceSnapshot>,
    pub rejected: Vec<RejectedCue>,
    pub requests: Vec<String>,
    pub scripts_requested: usize,
    pub pending_timers_after_teardown: usize,
    pub attached_containers_after_teardown: usize,
}

/// Plays the scenario from zero to its duration in `step_ms` increments and
/// tears everything down at the end.
pub fn simulate(scenario: &Scenario, step_ms: u64) -> Result<Summary> {
    scenario.config.validate()?;

    let timers = TimerQueue::new();
    let page = Rc::new(MemoryPage::with_elements(scenario.page.elements.iter().cloned()));
    for global in &scenario.page.globals {
        page.define_global(global.clone());
    }
    let provider = Rc::new(
        SimulatedProvider::from_responses(timers.clone(), scenario.responses.clone())
            .with_page(page.clone()),
    );
    let runtime = OverlayRuntime::new(
        timers.clone(),
        page.clone(),
        provider.clone(),
        scenario.config.coordinator.clone(),
    )?;

    let adapter: Rc<dyn RenderAdapter> = Rc::new(TraceAdapter);
    let mut timeline = TimelineScheduler::new(timers.clone());
    let mut rejected = Vec::new();
    for (index, cue) in scenario.cues.iter().enumerate() {
        match runtime.setup(cue, adapter.clone()) {
            Ok(instance) => timeline.add(cue.start_ms, cue.end_ms, instance),
            Err(err) => {
                tracing::warn!(cue = index, "skipping cue: {err}");
                rejected.push(RejectedCue {
                    index,
                    error: err.to_string(),
                });
            }
        }
    }

    let duration_ms = scenario.duration_ms();
    let step_ms = step_ms.max(1);
    let mut clock = PlaybackClock::default();
    loop {
        for event in timeline.tick(clock.time_ms) {
            tracing::debug!(
                instance = %event.instance,
                event = %event.kind,
                at_ms = event.at_ms,
                outcome = ?event.outcome,
                "delivered"
            );
        }
        if clock.time_ms >= duration_ms {
            break;
        }
        clock.advance(step_ms.min(duration_ms - clock.time_ms));
    }

    let instances = timeline
        .cues()
        .iter()
        .map(|cue| cue.instance.snapshot())
        .collect();
    timeline.clear();

    Ok(Summary {
        duration_ms,
        instances,
        rejected,
        requests: provider.requests(),
        scripts_requested: runtime.scripts().len(),
        pending_timers_after_teardown: timers.pending(),
        attached_containers_after_teardown: runtime.registry().len(),
    })
}
