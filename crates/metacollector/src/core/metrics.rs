//! Event counters kept by each collector.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use api_types::EventKind;

/// Cumulative number of events generated by reconciliation, per event kind.
#[derive(Debug, Default)]
pub struct GeneratedEventsMetrics {
    added: AtomicU64,
    modified: AtomicU64,
    deleted: AtomicU64,
}

/// Point-in-time copy of [`GeneratedEventsMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub added: u64,
    pub modified: u64,
    pub deleted: u64,
}

impl GeneratedEventsMetrics {
    pub fn record(&self, kind: EventKind) {
        let counter = match kind {
            EventKind::Added => &self.added,
            EventKind::Modified => &self.modified,
            EventKind::Deleted => &self.deleted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EventCounts {
        EventCounts {
            added: self.added.load(Ordering::Relaxed),
            modified: self.modified.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
        }
    }
}
