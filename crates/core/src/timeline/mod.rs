use serde::{Deserialize, Serialize};

use crate::controller::{EventKind, EventPayload, InstanceController, InstanceId, Outcome};
use crate::timers::TimerQueue;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackClock {
    pub time_ms: u64,
}

impl PlaybackClock {
    pub fn reset(&mut self) {
        self.time_ms = 0;
    }

    pub fn advance(&mut self, delta_ms: u64) {
        self.time_ms = self.time_ms.saturating_add(delta_ms);
    }

    pub fn seek(&mut self, time_ms: u64) {
        self.time_ms = time_ms;
    }
}

/// One overlay bound to the half-open playback range `[start_ms, end_ms)`.
#[derive(Debug)]
pub struct Cue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub instance: InstanceController,
    active: bool,
}

impl Cue {
    pub fn covers(&self, time_ms: u64) -> bool {
        self.start_ms <= time_ms && time_ms < self.end_ms
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// A lifecycle event delivered by [`TimelineScheduler::tick`].
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    pub instance: InstanceId,
    pub kind: EventKind,
    pub at_ms: u64,
    pub outcome: Outcome,
}

/// Drives `start`/`end` for a set of cues as playback moves.
#[derive(Debug)]
pub struct TimelineScheduler {
    timers: TimerQueue,
    cues: Vec<Cue>,
}

impl TimelineScheduler {
    pub fn new(timers: TimerQueue) -> Self {
        Self {
            timers,
            cues: Vec::new(),
        }
    }

    pub fn add(&mut self, start_ms: u64, end_ms: u64, instance: InstanceController) {
        let index = self.cues.partition_point(|cue| cue.start_ms <= start_ms);
        self.cues.insert(
            index,
            Cue {
                start_ms,
                end_ms,
                instance,
                active: false,
            },
        );
    }

    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Runs due timers up to `now_ms`, then ends every cue playback has left
    /// and starts every cue it has entered. Ends go first so a container
    /// shared by back-to-back cues is vacated before it is reused.
    pub fn tick(&mut self, now_ms: u64) -> Vec<Delivered> {
        self.timers.advance_to(now_ms);
        let payload = EventPayload { at_ms: now_ms };
        let mut delivered = Vec::new();

        for cue in self.cues.iter_mut().filter(|cue| cue.active && !cue.covers(now_ms)) {
            cue.active = false;
            delivered.push(Delivered {
                instance: cue.instance.id(),
                kind: EventKind::End,
                at_ms: now_ms,
                outcome: cue.instance.end(payload),
            });
        }
        for cue in self.cues.iter_mut().filter(|cue| !cue.active && cue.covers(now_ms)) {
            cue.active = true;
            delivered.push(Delivered {
                instance: cue.instance.id(),
                kind: EventKind::Start,
                at_ms: now_ms,
                outcome: cue.instance.start(payload),
            });
        }

        if !delivered.is_empty() {
            tracing::debug!(now_ms, events = delivered.len(), "timeline tick");
        }
        delivered
    }

    /// Tears down every instance and forgets all cues.
    pub fn clear(&mut self) -> Vec<InstanceController> {
        let cues = std::mem::take(&mut self.cues);
        cues.into_iter()
            .map(|cue| {
                cue.instance.teardown();
                cue.instance
            })
            .collect()
    }
}
