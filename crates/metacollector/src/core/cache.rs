//! Node association cache
//!
//! One [`ResourceEntry`] per tracked object. Entries are stored behind an
//! `Arc` and replaced whole, so a reader always sees either the previous or the
//! next committed state of a key.

use std::sync::Arc;

use api_types::MetadataEvent;
use dashmap::DashMap;
use tracing::debug;

use crate::core::entry::ResourceEntry;
use crate::core::entry::Transition;
use crate::core::types::ResourceKey;

/// How a transition lands in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitAction {
    Insert,
    Update,
    Remove,
    Skip,
}

impl CommitAction {
    fn for_transition(had_prior: bool, transition: &Transition) -> Self {
        match (had_prior, transition.is_empty()) {
            (false, false) => CommitAction::Insert,
            (false, true) => CommitAction::Skip,
            (true, false) => CommitAction::Update,
            (true, true) => CommitAction::Remove,
        }
    }
}

#[derive(Debug, Default)]
pub struct AssociationCache {
    entries: DashMap<ResourceKey, Arc<ResourceEntry>>,
}

impl AssociationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ResourceKey) -> Option<Arc<ResourceEntry>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Store the entry of a newly tracked key, returning what it replaced.
    pub fn insert(&self, key: ResourceKey, entry: ResourceEntry) -> Option<Arc<ResourceEntry>> {
        self.entries.insert(key, Arc::new(entry))
    }

    /// Replace the entry of an already tracked key.
    ///
    /// Returns false, leaving the cache untouched, when the key is not tracked.
    pub fn update(&self, key: &ResourceKey, entry: ResourceEntry) -> bool {
        match self.entries.get_mut(key) {
            Some(mut slot) => {
                *slot = Arc::new(entry);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &ResourceKey) -> Option<Arc<ResourceEntry>> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Commit `transition` for `key` and hand back the events it produced.
    ///
    /// `had_prior` tells whether the transition was derived from a cached entry.
    pub fn commit(
        &self,
        key: &ResourceKey,
        had_prior: bool,
        transition: Transition,
    ) -> Vec<MetadataEvent> {
        let action = CommitAction::for_transition(had_prior, &transition);
        let Transition { entry, pending } = transition;
        let events = pending.into_events(key, &entry);

        match action {
            CommitAction::Insert => {
                self.insert(key.clone(), entry);
            }
            CommitAction::Update => {
                if !self.update(key, entry.clone()) {
                    self.insert(key.clone(), entry);
                }
            }
            CommitAction::Remove => {
                self.remove(key);
            }
            CommitAction::Skip => {}
        }
        debug!(key = %key, action = ?action, events = events.len(), "Transition committed");

        events
    }

    /// Point-in-time copy of every entry.
    pub fn snapshot(&self) -> Vec<(ResourceKey, Arc<ResourceEntry>)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use api_types::EventKind;
    use api_types::ResourceKind;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::core::types::NodeSet;

    fn nodes(names: &[&str]) -> NodeSet {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn first(nodes: NodeSet) -> Transition {
        ResourceEntry::first_seen(ResourceKind::Deployment, "uid-1", "{}".to_string(), nodes)
    }

    #[test]
    fn first_commit_inserts() {
        let cache = AssociationCache::new();
        let key = ResourceKey::new("default", "web");

        let events = cache.commit(&key, false, first(nodes(&["a", "b"])));

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| event.kind == EventKind::Added));
        let entry = cache.get(&key).expect("entry committed");
        assert_eq!(entry.nodes(), &nodes(&["a", "b"]));
    }

    #[test]
    fn empty_first_transition_is_not_cached() {
        let cache = AssociationCache::new();
        let key = ResourceKey::new("default", "web");

        let events = cache.commit(&key, false, first(NodeSet::new()));

        assert!(events.is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn emptied_entry_is_removed() {
        let cache = AssociationCache::new();
        let key = ResourceKey::new("default", "web");
        cache.commit(&key, false, first(nodes(&["a"])));

        let prior = cache.get(&key).expect("entry committed");
        let events = cache.commit(&key, true, prior.retire());

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Deleted);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn update_of_untracked_key_is_refused() {
        let cache = AssociationCache::new();
        let key = ResourceKey::new("default", "web");

        assert!(!cache.update(&key, first(nodes(&["a"])).entry));
        assert!(cache.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_later_commits() {
        let cache = AssociationCache::new();
        let key = ResourceKey::new("default", "web");
        cache.commit(&key, false, first(nodes(&["a"])));

        let snapshot = cache.snapshot();
        let prior = cache.get(&key).expect("entry committed");
        cache.commit(&key, true, prior.advance("uid-1", "{}".to_string(), nodes(&["b"])));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].1.nodes(), &nodes(&["a"]));
        assert_eq!(
            cache.get(&key).expect("entry kept").nodes(),
            &nodes(&["b"])
        );
    }
}
