//! Reconciliation engine
//!
//! A [`Collector`] tracks one kind of resource. Each reconciliation cycle
//! fetches one object, works out which nodes need it, diffs that against the
//! cached association, commits the result and hands the per-node events to the
//! [`Dispatcher`]. Independently, the join loop replays the cache to every node
//! that (re)subscribes.

use std::sync::Arc;

use api_types::EventKind;
use api_types::MetadataEvent;
use api_types::ResourceKind;
use error_stack::bail;
use error_stack::Report;
use tokio::select;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::core::cache::AssociationCache;
use crate::core::dispatcher::Dispatcher;
use crate::core::entry::ResourceEntry;
use crate::core::metrics::GeneratedEventsMetrics;
use crate::core::normalize;
use crate::core::resolver::NodeResolver;
use crate::core::source::ObjectSource;
use crate::core::types::CollectorError;
use crate::core::types::ResourceKey;
use crate::util::keyed_lock::KeyedAsyncLock;

pub struct Collector<S, R> {
    kind: ResourceKind,
    source: S,
    resolver: R,
    cache: Arc<AssociationCache>,
    locks: KeyedAsyncLock<ResourceKey>,
    dispatcher: Dispatcher,
    metrics: Arc<GeneratedEventsMetrics>,
    joins: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl<S, R> Collector<S, R>
where
    S: ObjectSource,
    R: NodeResolver,
{
    /// Create a collector for the kind served by `source`.
    ///
    /// The join listener is registered right away, so nodes joining before
    /// [`start`](Self::start) runs are replayed once it does.
    pub fn new(source: S, resolver: R, dispatcher: Dispatcher) -> Self {
        let joins = dispatcher.join_listener();
        Self {
            kind: source.kind(),
            source,
            resolver,
            cache: Arc::new(AssociationCache::new()),
            locks: KeyedAsyncLock::new(),
            dispatcher,
            metrics: Arc::new(GeneratedEventsMetrics::default()),
            joins: Mutex::new(joins),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn cache(&self) -> &Arc<AssociationCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<GeneratedEventsMetrics> {
        &self.metrics
    }

    /// Run one reconciliation cycle for `key`.
    ///
    /// Returns the events the cycle generated. On error nothing was committed
    /// and the caller is expected to retry.
    #[instrument(skip(self, key, cancellation), fields(kind = %self.kind, key = %key))]
    pub async fn reconcile(
        &self,
        key: &ResourceKey,
        cancellation: &CancellationToken,
    ) -> Result<Vec<MetadataEvent>, Report<CollectorError>> {
        let _guard = self.locks.lock(key).await;
        self.ensure_active(key, cancellation)?;

        let fetched = select! {
            _ = cancellation.cancelled() => return Err(self.cancelled(key)),
            fetched = self.source.get(key) => fetched?,
        };
        let prior = self.cache.get(key);

        let transition = match (fetched, prior.as_deref()) {
            (None, None) => {
                debug!("Object not found and not tracked");
                return Ok(Vec::new());
            }
            (None, Some(entry)) => {
                debug!("Object deleted");
                entry.retire()
            }
            (Some(object), prior) => {
                let fields = normalize::serialize_fields(self.kind, key, &object.meta)?;
                let nodes = select! {
                    _ = cancellation.cancelled() => return Err(self.cancelled(key)),
                    nodes = self.resolver.resolve(key, &object) => nodes?,
                };
                match prior {
                    Some(entry) => entry.advance(object.uid(), fields, nodes),
                    None => ResourceEntry::first_seen(self.kind, object.uid(), fields, nodes),
                }
            }
        };

        // Nothing past this point awaits: the cycle commits and pushes as a whole.
        self.ensure_active(key, cancellation)?;

        let events = self.cache.commit(key, prior.is_some(), transition);
        for event in &events {
            self.metrics.record(event.kind);
            self.dispatcher.push(event.clone());
        }
        if !events.is_empty() {
            debug!(events = events.len(), "Events dispatched");
        }

        Ok(events)
    }

    /// Replay every entry associated with `node` as an `Added` event.
    ///
    /// Each entry is read and sent under its key lock, so a replayed event
    /// never overtakes a live event of a cycle that committed before it. The
    /// replay waits for the subscriber to drain rather than overflowing its
    /// queue.
    #[instrument(skip(self, cancellation), fields(kind = %self.kind))]
    pub async fn replay(&self, node: &str, cancellation: &CancellationToken) -> usize {
        let mut replayed = 0;
        for key in self.cache.keys() {
            if cancellation.is_cancelled() {
                break;
            }
            let _guard = self.locks.lock(&key).await;
            let Some(entry) = self.cache.get(&key) else {
                continue;
            };
            if !entry.is_associated_with(node) {
                continue;
            }
            let event = entry.event_for(&key, node, EventKind::Added);
            drop(entry);
            let pushed = select! {
                _ = cancellation.cancelled() => break,
                pushed = self.dispatcher.push_replayed(event) => pushed,
            };
            if !pushed {
                // gone again; its next join triggers a fresh replay
                debug!(replayed, "Subscriber left during replay");
                break;
            }
            replayed += 1;
        }
        replayed
    }

    /// Run the subscriber join loop until `cancellation` fires.
    pub async fn start(&self, cancellation: CancellationToken) -> Result<(), Report<CollectorError>> {
        let mut joins = self.joins.lock().await;
        info!(kind = %self.kind, "Subscriber join loop started");

        loop {
            select! {
                _ = cancellation.cancelled() => {
                    info!(kind = %self.kind, "Subscriber join loop shutdown requested");
                    return Ok(());
                }
                joined = joins.recv() => {
                    let Some(node) = joined else {
                        warn!(kind = %self.kind, "Subscriber join listener closed");
                        bail!(CollectorError::JoinListenerClosed { kind: self.kind });
                    };
                    let replayed = self.replay(&node, &cancellation).await;
                    info!(kind = %self.kind, node = %node, replayed, "Subscriber replayed");
                }
            }
        }
    }

    fn ensure_active(
        &self,
        key: &ResourceKey,
        cancellation: &CancellationToken,
    ) -> Result<(), Report<CollectorError>> {
        if cancellation.is_cancelled() {
            return Err(self.cancelled(key));
        }
        Ok(())
    }

    fn cancelled(&self, key: &ResourceKey) -> Report<CollectorError> {
        Report::new(CollectorError::Cancelled {
            kind: self.kind,
            key: key.clone(),
        })
    }
}
