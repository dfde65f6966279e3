//! Revalidation audit trail.
//!
//! A bounded, process-lifetime log of cache invalidation actions. The log is
//! intentionally not persisted; it is empty after every restart.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Default number of events retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Pseudo-tag recorded for purge-all events.
pub const PURGE_ALL_TAG: &str = "all";

/// What an invalidation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryAction {
    Refresh,
    PurgeAll,
}

/// One recorded invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEvent {
    pub id: String,
    pub tag: String,
    pub action: HistoryAction,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// FIFO-bounded event log.
pub struct RevalidationHistoryLog {
    events: Mutex<VecDeque<HistoryEvent>>,
    capacity: usize,
}

impl Default for RevalidationHistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl RevalidationHistoryLog {
    /// Creates an empty log holding at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Records an event, evicting the oldest one when full.
    pub fn append(&self, tag: impl Into<String>, action: HistoryAction) -> HistoryEvent {
        let timestamp = OffsetDateTime::now_utc();
        let event = HistoryEvent {
            id: event_id(timestamp),
            tag: tag.into(),
            action,
            timestamp,
        };

        let mut events = self.events.lock();
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        drop(events);

        tracing::info!(id = %event.id, tag = %event.tag, action = ?event.action, "revalidation recorded");
        event
    }

    /// All events, newest first.
    pub fn list(&self) -> Vec<HistoryEvent> {
        self.events.lock().iter().rev().cloned().collect()
    }

    /// Drops every event. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut events = self.events.lock();
        let removed = events.len();
        events.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// `<unix-millis>-<random hex>`.
fn event_id(at: OffsetDateTime) -> String {
    let millis = at.unix_timestamp_nanos() / 1_000_000;
    format!("{millis}-{:016x}", rand::random::<u64>())
}
