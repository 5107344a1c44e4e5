//! Periodic metrics reporting in InfluxDB line protocol.

use std::sync::Arc;
use std::time::Duration;

use api_types::MetadataEvent;
use api_types::ResourceKind;
use chrono::Utc;
use node_stream::SubscriberHub;
use tokio_util::sync::CancellationToken;

use crate::core::cache::AssociationCache;
use crate::core::metrics::GeneratedEventsMetrics;
use crate::core::workqueue::WorkQueue;

pub mod influx;

use influx::Point;

/// What the reporter reads from one collector.
#[derive(Clone)]
pub struct CollectorGauges {
    pub kind: ResourceKind,
    pub events: Arc<GeneratedEventsMetrics>,
    pub cache: Arc<AssociationCache>,
    pub queue: Arc<WorkQueue>,
}

/// Encode the current state of every collector and of the hub.
pub fn encode_snapshot(
    collectors: &[CollectorGauges],
    hub: &SubscriberHub<MetadataEvent>,
    timestamp: i64,
) -> Vec<String> {
    let mut lines: Vec<String> = collectors
        .iter()
        .map(|collector| {
            let events = collector.events.snapshot();
            Point::new("metacollector_events")
                .tag("kind", collector.kind.as_str())
                .field("added", events.added)
                .field("modified", events.modified)
                .field("deleted", events.deleted)
                .field("cache_entries", collector.cache.len())
                .field("queue_depth", collector.queue.len())
                .encode(timestamp)
        })
        .collect();

    let stats = hub.hub_stats();
    lines.push(
        Point::new("metacollector_subscribers")
            .field("connected", stats.subscribers)
            .field("joins", stats.joins)
            .field("dropped_not_connected", stats.dropped_not_connected)
            .field("dropped_queue_full", stats.dropped_queue_full)
            .encode(timestamp),
    );
    lines
}

/// Log a snapshot under the `metrics` target every `interval` until cancelled.
pub async fn run_metrics(
    collectors: Vec<CollectorGauges>,
    hub: Arc<SubscriberHub<MetadataEvent>>,
    interval: Duration,
    cancellation_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                tracing::info!("Metrics reporting shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
                for line in encode_snapshot(&collectors, &hub, timestamp) {
                    tracing::info!(
                        target: "metrics",
                        msg = %line,
                    );
                }
            }
        }
    }
}
