//! Routing of watch notifications to the per-kind work queues.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use api_types::ResourceKind;
use dashmap::DashMap;
use tracing::trace;

use crate::core::cache::AssociationCache;
use crate::core::types::ResourceKey;
use crate::core::workqueue::WorkQueue;
use crate::infrastructure::k8s::pod_index::IndexedPod;
use crate::infrastructure::k8s::pod_index::IndexedReplicaSet;
use crate::infrastructure::k8s::pod_index::PodIndex;

/// Knows, for every enabled kind, where to queue keys and what is cached.
///
/// Triggers for kinds that are not enabled are ignored.
#[derive(Default)]
pub struct TriggerRouter {
    queues: HashMap<ResourceKind, Arc<WorkQueue>>,
    caches: HashMap<ResourceKind, Arc<AssociationCache>>,
    /// Service names per namespace, for pod changes to reach selectors
    services: DashMap<String, HashSet<String>>,
}

impl TriggerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(
        mut self,
        queue: Arc<WorkQueue>,
        cache: Arc<AssociationCache>,
    ) -> Self {
        let kind = queue.kind();
        self.queues.insert(kind, queue);
        self.caches.insert(kind, cache);
        self
    }

    pub fn is_enabled(&self, kind: ResourceKind) -> bool {
        self.queues.contains_key(&kind)
    }

    pub fn queue(&self, kind: ResourceKind) -> Option<&Arc<WorkQueue>> {
        self.queues.get(&kind)
    }

    pub fn trigger(&self, kind: ResourceKind, key: ResourceKey) {
        if let Some(queue) = self.queues.get(&kind) {
            trace!(kind = %kind, key = %key, "Reconcile triggered");
            queue.add(key);
        }
    }

    /// Trigger every listed key plus every cached one, so that objects deleted
    /// while the watch was down are reconciled too.
    pub fn resync(&self, kind: ResourceKind, listed: impl IntoIterator<Item = ResourceKey>) {
        if !self.is_enabled(kind) {
            return;
        }
        for key in listed {
            self.trigger(kind, key);
        }
        if let Some(cache) = self.caches.get(&kind) {
            for key in cache.keys() {
                self.trigger(kind, key);
            }
        }
    }

    /// Trigger everything whose node set may depend on `pod`.
    pub fn pod_changed(&self, index: &PodIndex, pod: &IndexedPod) {
        self.trigger(
            ResourceKind::Namespace,
            ResourceKey::cluster_scoped(&pod.namespace),
        );
        self.trigger(ResourceKind::Pod, pod.key());

        for owner in &pod.owners {
            match owner.kind.as_str() {
                "ReplicaSet" => {
                    self.trigger(
                        ResourceKind::ReplicaSet,
                        ResourceKey::new(&pod.namespace, &owner.name),
                    );
                    if let Some(deployment) = index
                        .replica_set(&owner.uid)
                        .and_then(|replica_set| replica_set.deployment)
                    {
                        self.trigger(
                            ResourceKind::Deployment,
                            ResourceKey::new(&pod.namespace, &deployment.name),
                        );
                    }
                }
                "ReplicationController" => self.trigger(
                    ResourceKind::ReplicationController,
                    ResourceKey::new(&pod.namespace, &owner.name),
                ),
                _ => {}
            }
        }

        for service in self.services_in(&pod.namespace) {
            self.trigger(
                ResourceKind::Service,
                ResourceKey::new(&pod.namespace, service),
            );
        }
    }

    /// The Deployment owning a ReplicaSet resolves through it.
    pub fn replica_set_changed(&self, replica_set: &IndexedReplicaSet) {
        if let Some(deployment) = &replica_set.deployment {
            self.trigger(
                ResourceKind::Deployment,
                ResourceKey::new(&replica_set.key.namespace, &deployment.name),
            );
        }
    }

    pub fn service_applied(&self, key: &ResourceKey) {
        self.services
            .entry(key.namespace.clone())
            .or_default()
            .insert(key.name.clone());
    }

    pub fn service_deleted(&self, key: &ResourceKey) {
        if let Some(mut names) = self.services.get_mut(&key.namespace) {
            names.remove(&key.name);
        }
        self.services
            .remove_if(&key.namespace, |_, names| names.is_empty());
    }

    pub fn services_in(&self, namespace: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .get(namespace)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Forget every known service, before a relist.
    pub fn clear_services(&self) {
        self.services.clear();
    }
}
