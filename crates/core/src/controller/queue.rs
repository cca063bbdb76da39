use super::{EventKind, EventPayload};

/// A lifecycle event held back while the gate is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEvent {
    pub kind: EventKind,
    pub payload: EventPayload,
}

/// Arrival-ordered queue holding at most one `Start` and one `End`.
#[derive(Debug, Default)]
pub struct PendingQueue {
    events: Vec<PendingEvent>,
}

impl PendingQueue {
    /// Queues a start, replacing any start already queued.
    pub fn push_start(&mut self, payload: EventPayload) {
        self.events.retain(|event| event.kind != EventKind::Start);
        self.events.push(PendingEvent {
            kind: EventKind::Start,
            payload,
        });
    }

    /// Queues an end. If a start is queued it is removed instead and `true`
    /// is returned.
    pub fn push_end(&mut self, payload: EventPayload) -> bool {
        let before = self.events.len();
        self.events.retain(|event| event.kind != EventKind::Start);
        if self.events.len() != before {
            return true;
        }
        self.events.retain(|event| event.kind != EventKind::End);
        self.events.push(PendingEvent {
            kind: EventKind::End,
            payload,
        });
        false
    }

    pub fn events(&self) -> &[PendingEvent] {
        &self.events
    }

    pub fn drain(&mut self) -> Vec<PendingEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
