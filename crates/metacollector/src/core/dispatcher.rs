//! Delivery of events to per-node subscriber streams.

use std::sync::Arc;
use std::time::Duration;

use api_types::MetadataEvent;
use node_stream::CommError;
use node_stream::SubscriberHub;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

/// How long a replay waits for a subscriber to make room before giving up on it.
const REPLAY_MAX_WAIT: Duration = Duration::from_secs(10);

/// Thin front of the subscriber hub used by the collectors.
///
/// Delivery failures are logged and dropped: a node that misses an event
/// catches up through the replay it gets when it reconnects.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    hub: Arc<SubscriberHub<MetadataEvent>>,
}

impl Dispatcher {
    pub fn new(hub: Arc<SubscriberHub<MetadataEvent>>) -> Self {
        Self { hub }
    }

    /// Forward `event` to the stream of `event.node`. Returns whether the
    /// event was queued.
    pub fn push(&self, event: MetadataEvent) -> bool {
        let node = event.node.clone();
        let resource = event.resource_key();
        let kind = event.kind;

        match self.hub.push(&node, event) {
            Ok(()) => true,
            Err(report) => {
                match report.current_context() {
                    CommError::NotConnected { .. } => {
                        debug!(node = %node, resource = %resource, event = %kind, "No subscriber, event dropped");
                    }
                    _ => {
                        warn!(node = %node, resource = %resource, event = %kind, error = ?report, "Event dropped");
                    }
                }
                false
            }
        }
    }

    /// Forward a replayed `event`, waiting for the subscriber to drain its
    /// queue instead of evicting it. Returns whether the event was queued.
    pub async fn push_replayed(&self, event: MetadataEvent) -> bool {
        let node = event.node.clone();
        let resource = event.resource_key();

        match self.hub.push_paced(&node, event, REPLAY_MAX_WAIT).await {
            Ok(()) => true,
            Err(report) => {
                debug!(node = %node, resource = %resource, error = ?report, "Replay event dropped");
                false
            }
        }
    }

    /// Channel of the node ids that (re)join from now on.
    pub fn join_listener(&self) -> mpsc::UnboundedReceiver<String> {
        self.hub.join_listener()
    }

    pub fn is_connected(&self, node: &str) -> bool {
        self.hub.is_connected(node)
    }

    pub fn hub(&self) -> &Arc<SubscriberHub<MetadataEvent>> {
        &self.hub
    }
}
