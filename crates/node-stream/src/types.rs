//! Common types for per-node streaming.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Statistics for a connected subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberStats {
    /// When the current stream was registered
    pub connected_at: DateTime<Utc>,
    /// Items accepted into the stream since it was registered
    pub delivered: u64,
    /// Items waiting in the stream queue
    pub pending: usize,
}

/// Hub-wide counters, kept across subscriber reconnections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    /// Number of registered subscribers
    pub subscribers: usize,
    /// Join notifications emitted
    pub joins: u64,
    /// Items dropped because the node had no subscriber
    pub dropped_not_connected: u64,
    /// Items dropped because the subscriber queue was full
    pub dropped_queue_full: u64,
}

#[derive(Debug, Default)]
pub(crate) struct HubCounters {
    pub(crate) joins: AtomicU64,
    pub(crate) dropped_not_connected: AtomicU64,
    pub(crate) dropped_queue_full: AtomicU64,
}

impl HubCounters {
    pub(crate) fn snapshot(&self, subscribers: usize) -> HubStats {
        HubStats {
            subscribers,
            joins: self.joins.load(Ordering::Relaxed),
            dropped_not_connected: self.dropped_not_connected.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
        }
    }
}
