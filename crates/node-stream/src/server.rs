//! Subscriber hub: one bounded stream per node.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use dashmap::DashMap;
use error_stack::bail;
use error_stack::Report;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

use crate::config::HubConfig;
use crate::error::CommError;
use crate::error::CommResult;
use crate::types::HubCounters;
use crate::types::HubStats;
use crate::types::SubscriberStats;

type Slots<T> = Arc<DashMap<String, SubscriberSlot<T>>>;

/// Live stream registered for a single node.
#[derive(Debug)]
struct SubscriberSlot<T> {
    /// Distinguishes a reconnected stream from the one it replaced
    generation: u64,
    sender: mpsc::Sender<T>,
    connected_at: DateTime<Utc>,
    delivered: Arc<AtomicU64>,
}

/// Receiving end of a node stream.
///
/// Dropping the subscription unregisters it, unless the node has already
/// reconnected with a newer stream.
#[derive(Debug)]
pub struct Subscription<T> {
    node_id: String,
    generation: u64,
    receiver: mpsc::Receiver<T>,
    slots: Slots<T>,
}

impl<T> Subscription<T> {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Wait for the next item. Returns `None` once the stream has been replaced,
    /// evicted or unregistered and every buffered item was consumed.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Take the next buffered item without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let generation = self.generation;
        if self
            .slots
            .remove_if(&self.node_id, |_, slot| slot.generation == generation)
            .is_some()
        {
            debug!(node_id = %self.node_id, "Subscriber stream closed");
        }
    }
}

/// Routes items to per-node subscriber streams and announces subscriber joins.
///
/// [`push`](Self::push) never blocks: an item for a node without a subscriber
/// is rejected with [`CommError::NotConnected`], and a subscriber whose queue
/// is full is evicted so that it reconnects and gets a fresh join notification.
/// Bulk producers use [`push_paced`](Self::push_paced) instead, which waits for
/// the subscriber to drain.
#[derive(Debug)]
pub struct SubscriberHub<T> {
    config: HubConfig,
    slots: Slots<T>,
    join_listeners: Mutex<Vec<mpsc::UnboundedSender<String>>>,
    next_generation: AtomicU64,
    counters: HubCounters,
}

impl<T> SubscriberHub<T>
where
    T: Send + 'static,
{
    /// Create a new hub.
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a new hub with custom configuration.
    pub fn with_config(config: HubConfig) -> Self {
        info!(
            queue_capacity = config.queue_capacity,
            keep_alive_secs = config.keep_alive.as_secs(),
            "Subscriber hub created"
        );

        Self {
            config,
            slots: Arc::new(DashMap::new()),
            join_listeners: Mutex::new(Vec::new()),
            next_generation: AtomicU64::new(1),
            counters: HubCounters::default(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a stream for `node_id`, replacing any previous one.
    ///
    /// The replaced stream ends once its buffered items are consumed.
    #[instrument(skip(self))]
    pub fn register(&self, node_id: &str) -> Subscription<T> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.config.queue_capacity.max(1));

        let slot = SubscriberSlot {
            generation,
            sender,
            connected_at: Utc::now(),
            delivered: Arc::new(AtomicU64::new(0)),
        };
        if self.slots.insert(node_id.to_string(), slot).is_some() {
            info!(generation, "Subscriber reconnected, previous stream replaced");
        } else {
            info!(generation, "Subscriber registered");
        }

        Subscription {
            node_id: node_id.to_string(),
            generation,
            receiver,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Remove the stream for `node_id`, whatever its generation.
    pub fn unregister(&self, node_id: &str) -> bool {
        let removed = self.slots.remove(node_id).is_some();
        if removed {
            info!(node_id = %node_id, "Subscriber unregistered");
        }
        removed
    }

    /// Register a stream and announce the join to every join listener.
    pub fn subscribe(&self, node_id: &str) -> Subscription<T> {
        let subscription = self.register(node_id);
        self.notify_join(node_id);
        subscription
    }

    /// Announce that `node_id` (re)joined. Listeners whose receiver is gone
    /// are forgotten.
    pub fn notify_join(&self, node_id: &str) {
        self.counters.joins.fetch_add(1, Ordering::Relaxed);
        let mut listeners = match self.join_listeners.lock() {
            Ok(listeners) => listeners,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.retain(|listener| listener.send(node_id.to_string()).is_ok());
        debug!(node_id = %node_id, listeners = listeners.len(), "Subscriber join announced");
    }

    /// Obtain a channel receiving the node id of every subsequent join.
    pub fn join_listener(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = match self.join_listeners.lock() {
            Ok(listeners) => listeners,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.push(tx);
        rx
    }

    /// Hand `item` to the stream of `node_id` without waiting.
    pub fn push(&self, node_id: &str, item: T) -> CommResult<()> {
        let (generation, sender, delivered) = self.sender_of(node_id)?;

        match sender.try_send(item) {
            Ok(()) => {
                delivered.fetch_add(1, Ordering::Relaxed);
                trace!(node_id = %node_id, "Item queued for subscriber");
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(self.evict_full(node_id, generation)),
            Err(TrySendError::Closed(_)) => Err(self.drop_closed(node_id, generation)),
        }
    }

    /// Hand `item` to the stream of `node_id` once its queue has room for it
    /// and for half the queue capacity on top, so that [`push`](Self::push)
    /// keeps working while a bulk producer is paced.
    ///
    /// A subscriber that does not make that room within `max_wait` is evicted
    /// as if its queue were full.
    pub async fn push_paced(&self, node_id: &str, item: T, max_wait: Duration) -> CommResult<()> {
        let (generation, sender, delivered) = self.sender_of(node_id)?;
        let wanted = sender.max_capacity() / 2 + 1;

        let result = match tokio::time::timeout(max_wait, sender.reserve_many(wanted)).await {
            Ok(Ok(mut permits)) => {
                if let Some(permit) = permits.next() {
                    permit.send(item);
                }
                delivered.fetch_add(1, Ordering::Relaxed);
                trace!(node_id = %node_id, "Item queued for subscriber after pacing");
                Ok(())
            }
            Ok(Err(_)) => Err(self.drop_closed(node_id, generation)),
            Err(_) => Err(self.evict_full(node_id, generation)),
        };
        result
    }

    /// Clone what a send needs so no map guard is held while sending or evicting.
    fn sender_of(&self, node_id: &str) -> CommResult<(u64, mpsc::Sender<T>, Arc<AtomicU64>)> {
        let Some(parts) = self.slots.get(node_id).map(|slot| {
            (
                slot.generation,
                slot.sender.clone(),
                Arc::clone(&slot.delivered),
            )
        }) else {
            self.counters
                .dropped_not_connected
                .fetch_add(1, Ordering::Relaxed);
            bail!(CommError::NotConnected {
                node_id: node_id.to_string(),
            });
        };
        Ok(parts)
    }

    fn evict_full(&self, node_id: &str, generation: u64) -> Report<CommError> {
        self.counters
            .dropped_queue_full
            .fetch_add(1, Ordering::Relaxed);
        self.slots
            .remove_if(node_id, |_, slot| slot.generation == generation);
        warn!(node_id = %node_id, "Subscriber queue full, evicting subscriber");
        Report::new(CommError::QueueFull {
            node_id: node_id.to_string(),
            capacity: self.config.queue_capacity,
        })
    }

    fn drop_closed(&self, node_id: &str, generation: u64) -> Report<CommError> {
        self.counters
            .dropped_not_connected
            .fetch_add(1, Ordering::Relaxed);
        self.slots
            .remove_if(node_id, |_, slot| slot.generation == generation);
        Report::new(CommError::NotConnected {
            node_id: node_id.to_string(),
        })
    }

    pub fn is_connected(&self, node_id: &str) -> bool {
        self.slots.contains_key(node_id)
    }

    /// Node ids with a registered stream.
    pub fn subscribers(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.slots.iter().map(|slot| slot.key().clone()).collect();
        nodes.sort();
        nodes
    }

    /// Get statistics for all subscribers.
    pub fn get_all_stats(&self) -> HashMap<String, SubscriberStats> {
        self.slots
            .iter()
            .map(|slot| (slot.key().clone(), Self::slot_stats(slot.value())))
            .collect()
    }

    /// Get statistics for a specific subscriber.
    pub fn get_subscriber_stats(&self, node_id: &str) -> Option<SubscriberStats> {
        self.slots.get(node_id).map(|slot| Self::slot_stats(&slot))
    }

    pub fn hub_stats(&self) -> HubStats {
        self.counters.snapshot(self.slots.len())
    }

    fn slot_stats(slot: &SubscriberSlot<T>) -> SubscriberStats {
        SubscriberStats {
            connected_at: slot.connected_at,
            delivered: slot.delivered.load(Ordering::Relaxed),
            pending: slot.sender.max_capacity() - slot.sender.capacity(),
        }
    }
}

impl<T> Default for SubscriberHub<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
