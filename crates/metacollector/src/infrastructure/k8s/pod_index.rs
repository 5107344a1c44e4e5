//! In-memory pod index
//!
//! Fed by the pod and ReplicaSet watchers, queried by the node resolvers.
//! Lookups only touch the pods under one index key.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use error_stack::bail;
use error_stack::Report;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use parking_lot::RwLock;
use tracing::debug;

use crate::core::resolver::IndexedField;
use crate::core::resolver::PodDescriptor;
use crate::core::resolver::PodLister;
use crate::core::types::ResourceKey;
use crate::infrastructure::k8s::types::KubernetesError;

/// Owner reference as far as the index cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub kind: String,
    pub uid: String,
    pub name: String,
}

impl From<&OwnerReference> for Owner {
    fn from(reference: &OwnerReference) -> Self {
        Self {
            kind: reference.kind.clone(),
            uid: reference.uid.clone(),
            name: reference.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedPod {
    pub namespace: String,
    pub name: String,
    pub node_name: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub owners: Vec<Owner>,
}

impl IndexedPod {
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let meta = &pod.metadata;
        Some(Self {
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone()?,
            node_name: pod.spec.as_ref().and_then(|spec| spec.node_name.clone()),
            labels: meta.labels.clone().unwrap_or_default(),
            owners: meta
                .owner_references
                .iter()
                .flatten()
                .map(Owner::from)
                .collect(),
        })
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.namespace, &self.name)
    }

    fn matches(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(label, value)| self.labels.get(label) == Some(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedReplicaSet {
    pub uid: String,
    pub key: ResourceKey,
    /// Owning Deployment, if any
    pub deployment: Option<Owner>,
}

impl IndexedReplicaSet {
    pub fn from_replica_set(replica_set: &ReplicaSet) -> Option<Self> {
        let meta = &replica_set.metadata;
        Some(Self {
            uid: meta.uid.clone()?,
            key: ResourceKey::from_meta(meta)?,
            deployment: meta
                .owner_references
                .iter()
                .flatten()
                .find(|owner| owner.kind == "Deployment")
                .map(Owner::from),
        })
    }
}

/// Pods with their lookup indexes, kept consistent with each other.
#[derive(Debug, Default)]
struct Pods {
    pods: HashMap<ResourceKey, IndexedPod>,
    by_namespace: HashMap<String, HashSet<ResourceKey>>,
    by_owner: HashMap<String, HashSet<ResourceKey>>,
}

impl Pods {
    fn build(pods: impl IntoIterator<Item = IndexedPod>) -> Self {
        let mut built = Self::default();
        for pod in pods {
            built.apply(pod);
        }
        built
    }

    fn apply(&mut self, pod: IndexedPod) -> Option<IndexedPod> {
        let key = pod.key();
        let relink = self
            .pods
            .get(&key)
            .map_or(true, |previous| {
                previous.namespace != pod.namespace || previous.owners != pod.owners
            });
        if relink {
            if let Some(previous) = self.pods.get(&key).cloned() {
                self.unlink(&key, &previous);
            }
            self.link(&key, &pod);
        }
        self.pods.insert(key, pod)
    }

    fn delete(&mut self, key: &ResourceKey) -> Option<IndexedPod> {
        let previous = self.pods.remove(key)?;
        self.unlink(key, &previous);
        Some(previous)
    }

    fn link(&mut self, key: &ResourceKey, pod: &IndexedPod) {
        self.by_namespace
            .entry(pod.namespace.clone())
            .or_default()
            .insert(key.clone());
        for owner in &pod.owners {
            self.by_owner
                .entry(owner.uid.clone())
                .or_default()
                .insert(key.clone());
        }
    }

    fn unlink(&mut self, key: &ResourceKey, pod: &IndexedPod) {
        unlink(&mut self.by_namespace, &pod.namespace, key);
        for owner in &pod.owners {
            unlink(&mut self.by_owner, &owner.uid, key);
        }
    }

    fn keys_under<'a>(
        index: &'a HashMap<String, HashSet<ResourceKey>>,
        value: &str,
    ) -> impl Iterator<Item = &'a ResourceKey> {
        index.get(value).into_iter().flatten()
    }
}

#[derive(Debug, Default)]
struct ReplicaSets {
    replica_sets: HashMap<String, IndexedReplicaSet>,
    by_deployment: HashMap<String, HashSet<String>>,
}

impl ReplicaSets {
    fn build(replica_sets: impl IntoIterator<Item = IndexedReplicaSet>) -> Self {
        let mut built = Self::default();
        for replica_set in replica_sets {
            built.apply(replica_set);
        }
        built
    }

    fn apply(&mut self, replica_set: IndexedReplicaSet) -> Option<IndexedReplicaSet> {
        let previous = self
            .replica_sets
            .insert(replica_set.uid.clone(), replica_set.clone());
        if let Some(deployment) = previous.as_ref().and_then(|previous| previous.deployment.as_ref()) {
            unlink(&mut self.by_deployment, &deployment.uid, &replica_set.uid);
        }
        if let Some(deployment) = &replica_set.deployment {
            self.by_deployment
                .entry(deployment.uid.clone())
                .or_default()
                .insert(replica_set.uid.clone());
        }
        previous
    }

    fn delete(&mut self, uid: &str) -> Option<IndexedReplicaSet> {
        let previous = self.replica_sets.remove(uid)?;
        if let Some(deployment) = &previous.deployment {
            unlink(&mut self.by_deployment, &deployment.uid, &previous.uid);
        }
        Some(previous)
    }
}

/// Pods indexed by namespace and owner, plus the ReplicaSet to Deployment
/// links.
///
/// Readers always see a complete state: single updates happen under the write
/// lock and a relist builds the new state aside and swaps it in.
#[derive(Debug, Default)]
pub struct PodIndex {
    pods: RwLock<Pods>,
    replica_sets: RwLock<ReplicaSets>,
    pods_synced: AtomicBool,
    replica_sets_synced: AtomicBool,
}

impl PodIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update `pod`, returning its previous state.
    pub fn apply_pod(&self, pod: IndexedPod) -> Option<IndexedPod> {
        self.pods.write().apply(pod)
    }

    pub fn delete_pod(&self, key: &ResourceKey) -> Option<IndexedPod> {
        self.pods.write().delete(key)
    }

    /// Replace the whole pod set after a (re)list and mark pods synced.
    ///
    /// Returns the pods indexed before.
    pub fn replace_pods(&self, pods: impl IntoIterator<Item = IndexedPod>) -> Vec<IndexedPod> {
        let fresh = Pods::build(pods);
        let count = fresh.pods.len();
        let previous = std::mem::replace(&mut *self.pods.write(), fresh);
        self.pods_synced.store(true, Ordering::Release);
        debug!(pods = count, "Pod index synced");
        previous.pods.into_values().collect()
    }

    pub fn apply_replica_set(&self, replica_set: IndexedReplicaSet) -> Option<IndexedReplicaSet> {
        self.replica_sets.write().apply(replica_set)
    }

    pub fn delete_replica_set(&self, uid: &str) -> Option<IndexedReplicaSet> {
        self.replica_sets.write().delete(uid)
    }

    /// Replace the whole ReplicaSet set after a (re)list and mark it synced.
    pub fn replace_replica_sets(
        &self,
        replica_sets: impl IntoIterator<Item = IndexedReplicaSet>,
    ) -> Vec<IndexedReplicaSet> {
        let fresh = ReplicaSets::build(replica_sets);
        let count = fresh.replica_sets.len();
        let previous = std::mem::replace(&mut *self.replica_sets.write(), fresh);
        self.replica_sets_synced.store(true, Ordering::Release);
        debug!(replica_sets = count, "ReplicaSet index synced");
        previous.replica_sets.into_values().collect()
    }

    pub fn replica_set(&self, uid: &str) -> Option<IndexedReplicaSet> {
        self.replica_sets.read().replica_sets.get(uid).cloned()
    }

    pub fn pod(&self, key: &ResourceKey) -> Option<IndexedPod> {
        self.pods.read().pods.get(key).cloned()
    }

    pub fn pod_count(&self) -> usize {
        self.pods.read().pods.len()
    }

    pub fn is_synced(&self) -> bool {
        self.pods_synced.load(Ordering::Acquire) && self.replica_sets_synced.load(Ordering::Acquire)
    }

    fn ensure_synced(&self, field: &IndexedField) -> Result<(), Report<KubernetesError>> {
        if !self.pods_synced.load(Ordering::Acquire) {
            bail!(KubernetesError::IndexNotSynced { index: "pods" });
        }
        if matches!(field, IndexedField::DeploymentUid(_))
            && !self.replica_sets_synced.load(Ordering::Acquire)
        {
            bail!(KubernetesError::IndexNotSynced {
                index: "replicasets"
            });
        }
        Ok(())
    }

    /// Pods of `namespace` selected by `field`, read from one consistent state.
    fn related_pods(&self, namespace: &str, field: &IndexedField) -> Vec<PodDescriptor> {
        let replica_sets: Vec<String> = match field {
            IndexedField::DeploymentUid(uid) => self
                .replica_sets
                .read()
                .by_deployment
                .get(uid)
                .map(|uids| uids.iter().cloned().collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        let pods = self.pods.read();
        let keys: Vec<&ResourceKey> = match field {
            IndexedField::Namespace => Pods::keys_under(&pods.by_namespace, namespace).collect(),
            IndexedField::OwnerUid(uid) => Pods::keys_under(&pods.by_owner, uid).collect(),
            IndexedField::DeploymentUid(_) => replica_sets
                .iter()
                .flat_map(|replica_set| Pods::keys_under(&pods.by_owner, replica_set))
                .collect(),
            // an empty selector selects nothing, not everything
            IndexedField::Selector(selector) if selector.is_empty() => Vec::new(),
            IndexedField::Selector(_) => Pods::keys_under(&pods.by_namespace, namespace).collect(),
        };

        keys.into_iter()
            .filter(|key| key.namespace == namespace)
            .filter_map(|key| pods.pods.get(key))
            .filter(|pod| match field {
                IndexedField::Selector(selector) => pod.matches(selector),
                _ => true,
            })
            .map(|pod| PodDescriptor {
                node_name: pod.node_name.clone(),
            })
            .collect()
    }
}

fn unlink<V>(index: &mut HashMap<String, HashSet<V>>, value: &str, member: &V)
where
    V: Eq + std::hash::Hash,
{
    if let Some(members) = index.get_mut(value) {
        members.remove(member);
        if members.is_empty() {
            index.remove(value);
        }
    }
}

#[async_trait]
impl PodLister for PodIndex {
    type Error = KubernetesError;

    async fn list_related_pods(
        &self,
        namespace: &str,
        field: &IndexedField,
    ) -> Result<Vec<PodDescriptor>, Report<KubernetesError>> {
        self.ensure_synced(field)?;
        Ok(self.related_pods(namespace, field))
    }
}
