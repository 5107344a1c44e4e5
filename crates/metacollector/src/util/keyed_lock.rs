//! Per-key async lock whose entries disappear with their last holder

use std::hash::Hash;
use std::sync::Arc;
use std::sync::Weak;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;

type LockMap<K> = Arc<DashMap<K, Weak<Mutex<()>>>>;

/// Holds the lock of one key until dropped.
///
/// The map entry of the key is removed when the last guard or waiter for it
/// goes away.
pub struct KeyedLockGuard<K>
where
    K: Hash + Eq + Clone,
{
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<Mutex<()>>,
    key: K,
    locks: LockMap<K>,
}

impl<K> Drop for KeyedLockGuard<K>
where
    K: Hash + Eq + Clone,
{
    fn drop(&mut self) {
        drop(self.guard.take());

        // Only `self.lock` left: no holder and no waiter.
        if Arc::strong_count(&self.lock) == 1 {
            self.locks
                .remove_if(&self.key, |_, weak| weak.strong_count() <= 1);
        }
    }
}

/// Serializes work per key while letting different keys proceed in parallel.
///
/// Used by the collectors so that a resource is never reconciled by two cycles
/// at once, and so that replay reads an entry only between cycles.
pub struct KeyedAsyncLock<K>
where
    K: Hash + Eq + Clone,
{
    locks: LockMap<K>,
}

impl<K> KeyedAsyncLock<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Wait for the lock of `key`.
    pub async fn lock(&self, key: &K) -> KeyedLockGuard<K> {
        let lock = self.get_or_create(key);
        let guard = Arc::clone(&lock).lock_owned().await;

        KeyedLockGuard {
            guard: Some(guard),
            lock,
            key: key.clone(),
            locks: Arc::clone(&self.locks),
        }
    }

    fn get_or_create(&self, key: &K) -> Arc<Mutex<()>> {
        loop {
            match self.locks.entry(key.clone()) {
                Entry::Occupied(occupied) => {
                    if let Some(strong) = occupied.get().upgrade() {
                        return strong;
                    }
                    // last holder is going away, start over with a fresh lock
                    occupied.remove();
                }
                Entry::Vacant(vacant) => {
                    let strong = Arc::new(Mutex::new(()));
                    vacant.insert(Arc::downgrade(&strong));
                    return strong;
                }
            }
        }
    }

    /// Number of keys currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K> Default for KeyedAsyncLock<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::core::types::ResourceKey;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedAsyncLock::<ResourceKey>::new());
        let in_section = Arc::new(AtomicUsize::new(0));
        let entered = Arc::new(AtomicUsize::new(0));
        let key = ResourceKey::new("default", "web");

        let mut handles = vec![];
        for _ in 0..10 {
            let locks = Arc::clone(&locks);
            let in_section = Arc::clone(&in_section);
            let entered = Arc::clone(&entered);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&key).await;
                assert_eq!(in_section.fetch_add(1, Ordering::SeqCst), 0);
                sleep(Duration::from_millis(1)).await;
                in_section.fetch_sub(1, Ordering::SeqCst);
                entered.fetch_add(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.expect("task should not panic");
        }
        assert_eq!(entered.load(Ordering::SeqCst), 10);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_wait_for_each_other() {
        let locks = KeyedAsyncLock::<ResourceKey>::new();
        let web = ResourceKey::new("default", "web");
        let db = ResourceKey::new("default", "db");

        let _web = locks.lock(&web).await;
        let db_guard = tokio::time::timeout(Duration::from_secs(1), locks.lock(&db)).await;

        assert!(db_guard.is_ok(), "db lock should not wait for web");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn entry_removed_with_last_guard() {
        let locks = KeyedAsyncLock::<ResourceKey>::new();
        let key = ResourceKey::cluster_scoped("kube-system");

        {
            let _guard = locks.lock(&key).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());

        // the key can be locked again afterwards
        let _guard = locks.lock(&key).await;
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn entry_kept_while_someone_waits() {
        let locks = Arc::new(KeyedAsyncLock::<u32>::new());
        let first = locks.lock(&7).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock(&7).await;
            })
        };
        tokio::task::yield_now().await;
        sleep(Duration::from_millis(10)).await;

        drop(first);
        assert!(!locks.is_empty() || waiter.is_finished());

        waiter.await.expect("waiter should not panic");
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn many_keys_under_contention_are_cleaned_up() {
        let locks = Arc::new(KeyedAsyncLock::<u32>::new());
        let done = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for task in 0..100u32 {
            let locks = Arc::clone(&locks);
            let done = Arc::clone(&done);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&(task % 5)).await;
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.expect("task should not panic");
        }
        assert_eq!(done.load(Ordering::SeqCst), 100);
        assert!(locks.is_empty());
    }
}
