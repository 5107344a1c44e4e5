//! Deduplicating work queue with retry backoff
//!
//! Watch notifications only name a key; a worker then reconciles the key
//! against the current state of the cluster. A key queued several times before
//! a worker picks it up is processed once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use api_types::ResourceKind;
use dashmap::DashMap;
use error_stack::Report;
use futures::stream;
use futures::StreamExt;
use tokio::select;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::core::types::CollectorError;
use crate::core::types::ResourceKey;

/// Exponential retry delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the retry following the `failures`-th consecutive failure.
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(300))
    }
}

pub struct WorkQueue {
    kind: ResourceKind,
    sender: mpsc::UnboundedSender<ResourceKey>,
    receiver: Mutex<mpsc::UnboundedReceiver<ResourceKey>>,
    queued: DashMap<ResourceKey, ()>,
    failures: DashMap<ResourceKey, u32>,
    backoff: Backoff,
}

impl WorkQueue {
    pub fn new(kind: ResourceKind, backoff: Backoff) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            kind,
            sender,
            receiver: Mutex::new(receiver),
            queued: DashMap::new(),
            failures: DashMap::new(),
            backoff,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Queue `key` unless it is already waiting for a worker.
    pub fn add(&self, key: ResourceKey) {
        if self.queued.insert(key.clone(), ()).is_some() {
            return;
        }
        if self.sender.send(key.clone()).is_err() {
            self.queued.remove(&key);
        }
    }

    /// Number of keys waiting for a worker.
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.queued.contains_key(key)
    }

    /// Consecutive failures recorded for `key`.
    pub fn failures(&self, key: &ResourceKey) -> u32 {
        self.failures.get(key).map_or(0, |failures| *failures)
    }

    /// Process queued keys with up to `workers` concurrent calls of `handler`
    /// until `cancellation` fires.
    ///
    /// Retryable failures are queued again after a backoff delay.
    pub async fn run<F, Fut>(self: &Arc<Self>, workers: usize, cancellation: CancellationToken, handler: F)
    where
        F: Fn(ResourceKey) -> Fut,
        Fut: Future<Output = Result<(), Report<CollectorError>>>,
    {
        let mut receiver = self.receiver.lock().await;
        info!(kind = %self.kind, workers, "Work queue started");

        stream::poll_fn(|cx| receiver.poll_recv(cx))
            .take_until(cancellation.cancelled())
            .for_each_concurrent(workers.max(1), |key| {
                self.queued.remove(&key);
                let handled = handler(key.clone());
                let cancellation = cancellation.clone();
                async move {
                    match handled.await {
                        Ok(()) => {
                            self.failures.remove(&key);
                        }
                        Err(err) if err.current_context().is_retryable() => {
                            self.retry_later(key, &err, cancellation);
                        }
                        Err(err) => {
                            debug!(kind = %self.kind, key = %key, error = ?err, "Dropping key");
                            self.failures.remove(&key);
                        }
                    }
                }
            })
            .await;

        info!(kind = %self.kind, "Work queue stopped");
    }

    fn retry_later(
        self: &Arc<Self>,
        key: ResourceKey,
        err: &Report<CollectorError>,
        cancellation: CancellationToken,
    ) {
        let failures = {
            let mut failures = self.failures.entry(key.clone()).or_insert(0);
            *failures += 1;
            *failures
        };
        let delay = self.backoff.delay(failures);
        warn!(
            kind = %self.kind,
            key = %key,
            failures,
            delay_ms = delay.as_millis() as u64,
            error = ?err,
            "Reconciliation failed, retrying"
        );

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            select! {
                _ = cancellation.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn backoff_doubles_up_to_max() {
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(50));

        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(2), Duration::from_millis(20));
        assert_eq!(backoff.delay(3), Duration::from_millis(40));
        assert_eq!(backoff.delay(4), Duration::from_millis(50));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(50));
    }

    #[test]
    fn duplicate_keys_are_queued_once() {
        let queue = WorkQueue::new(ResourceKind::Pod, Backoff::default());
        let key = ResourceKey::new("default", "web-1");

        queue.add(key.clone());
        queue.add(key.clone());
        queue.add(ResourceKey::new("default", "web-2"));

        assert_eq!(queue.len(), 2);
    }

    #[test(tokio::test)]
    async fn handles_every_key_until_cancelled() {
        let queue = Arc::new(WorkQueue::new(ResourceKind::Pod, Backoff::default()));
        let token = CancellationToken::new();
        let handled = Arc::new(AtomicUsize::new(0));

        for i in 0..10 {
            queue.add(ResourceKey::new("default", format!("web-{i}")));
        }

        let runner = {
            let queue = Arc::clone(&queue);
            let token = token.clone();
            let handled = Arc::clone(&handled);
            tokio::spawn(async move {
                queue
                    .run(4, token, |_key| {
                        let handled = Arc::clone(&handled);
                        async move {
                            handled.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, Report<CollectorError>>(())
                        }
                    })
                    .await;
            })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while handled.load(Ordering::SeqCst) < 10 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("all keys handled");

        token.cancel();
        runner.await.expect("runner should not panic");
        assert!(queue.is_empty());
    }

    #[test(tokio::test)]
    async fn retryable_failure_is_retried() {
        let queue = Arc::new(WorkQueue::new(
            ResourceKind::Deployment,
            Backoff::new(Duration::from_millis(1), Duration::from_millis(10)),
        ));
        let token = CancellationToken::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let key = ResourceKey::new("default", "web");
        queue.add(key.clone());

        let runner = {
            let queue = Arc::clone(&queue);
            let token = token.clone();
            let attempts = Arc::clone(&attempts);
            tokio::spawn(async move {
                queue
                    .run(1, token, |key| {
                        let attempts = Arc::clone(&attempts);
                        async move {
                            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                                return Err(Report::new(CollectorError::Fetch {
                                    kind: ResourceKind::Deployment,
                                    key,
                                }));
                            }
                            Ok(())
                        }
                    })
                    .await;
            })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while attempts.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("retried until success");

        // failures are forgotten once the key succeeds
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.failures(&key), 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        token.cancel();
        runner.await.expect("runner should not panic");
    }

    #[test(tokio::test)]
    async fn cancelled_error_is_not_retried() {
        let queue = Arc::new(WorkQueue::new(
            ResourceKind::Service,
            Backoff::new(Duration::from_millis(1), Duration::from_millis(1)),
        ));
        let token = CancellationToken::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        queue.add(ResourceKey::new("default", "db"));

        let runner = {
            let queue = Arc::clone(&queue);
            let token = token.clone();
            let attempts = Arc::clone(&attempts);
            tokio::spawn(async move {
                queue
                    .run(1, token, |key| {
                        let attempts = Arc::clone(&attempts);
                        async move {
                            attempts.fetch_add(1, Ordering::SeqCst);
                            Err::<(), _>(Report::new(CollectorError::Cancelled {
                                kind: ResourceKind::Service,
                                key,
                            }))
                        }
                    })
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        token.cancel();
        runner.await.expect("runner should not panic");
    }
}
