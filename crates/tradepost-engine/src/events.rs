//! In-engine event log.
//!
//! Every committed transition appends one [`EventRecord`]. The embedding
//! service drains the buffer and forwards it; the sequence counter keeps
//! running across drains (and across snapshots) so consumers can detect
//! gaps.

use chrono::{DateTime, Utc};
use tradepost_types::{EventId, EventRecord, MarketEvent};

#[derive(Debug, Default)]
pub struct EventLog {
    next_sequence: u64,
    pending: Vec<EventRecord>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume numbering at `next_sequence`.
    #[must_use]
    pub fn starting_at(next_sequence: u64) -> Self {
        Self {
            next_sequence,
            pending: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: MarketEvent, at: DateTime<Utc>) -> &EventRecord {
        tracing::debug!(event = event.name(), sequence = self.next_sequence, "Event emitted");
        let record = EventRecord {
            id: EventId::new(),
            sequence: self.next_sequence,
            emitted_at: at,
            event,
        };
        self.next_sequence += 1;
        self.pending.push(record);
        &self.pending[self.pending.len() - 1]
    }

    /// Take everything emitted since the last drain.
    pub fn drain(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut self.pending)
    }

    /// Events not yet drained.
    #[must_use]
    pub fn pending(&self) -> &[EventRecord] {
        &self.pending
    }

    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }
}
