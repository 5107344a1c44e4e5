//! Watch streams feeding the work queues and the pod index.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use api_types::ResourceKind;
use error_stack::Report;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher::watcher;
use kube::runtime::watcher::Config;
use kube::runtime::watcher::Event;
use kube::Api;
use kube::Resource;
use serde::de::DeserializeOwned;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::core::types::ResourceKey;
use crate::infrastructure::k8s::pod_index::IndexedPod;
use crate::infrastructure::k8s::pod_index::IndexedReplicaSet;
use crate::infrastructure::k8s::pod_index::PodIndex;
use crate::infrastructure::k8s::triggers::TriggerRouter;
use crate::infrastructure::k8s::types::KubernetesError;

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Reacts to the events of one watch stream.
pub trait WatchHandler<K>: Send + Sync {
    fn applied(&self, object: K);

    fn deleted(&self, object: K);

    /// The stream (re)listed: `objects` is the complete current set.
    fn restarted(&self, objects: Vec<K>);
}

/// Runs a watch on `api` until cancelled, restarting it when it fails.
pub struct Watcher<K, H>
where
    K: Resource,
{
    name: &'static str,
    api: Api<K>,
    handler: H,
}

impl<K, H> Watcher<K, H>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    H: WatchHandler<K>,
{
    pub fn new(name: &'static str, api: Api<K>, handler: H) -> Self {
        Self { name, api, handler }
    }

    #[tracing::instrument(skip_all, fields(watch = self.name))]
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<(), Report<KubernetesError>> {
        info!("Starting watcher");
        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!("Watcher shutdown requested");
                    break;
                }
                result = self.watch_once() => {
                    match result {
                        Ok(()) => {
                            warn!("Watch stream ended unexpectedly, restarting...");
                        }
                        Err(e) => {
                            error!("Watch failed: {e:?}");
                            select! {
                                _ = cancellation_token.cancelled() => break,
                                _ = tokio::time::sleep(RETRY_DELAY) => {}
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn watch_once(&self) -> Result<(), Report<KubernetesError>> {
        let mut stream = watcher(self.api.clone(), Config::default()).boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::Applied(object)) => self.handler.applied(object),
                Ok(Event::Deleted(object)) => self.handler.deleted(object),
                Ok(Event::Restarted(objects)) => {
                    debug!(objects = objects.len(), "Watch (re)listed");
                    self.handler.restarted(objects);
                }
                Err(e) => {
                    return Err(Report::new(KubernetesError::WatchFailed {
                        message: format!("{}: {e}", self.name),
                    }));
                }
            }
        }

        Ok(())
    }
}

fn key_of<K: Resource>(object: &K) -> Option<ResourceKey> {
    ResourceKey::from_meta(object.meta())
}

/// Triggers reconciliation of the changed object itself.
pub struct KindTriggers {
    kind: ResourceKind,
    router: Arc<TriggerRouter>,
}

impl KindTriggers {
    pub fn new(kind: ResourceKind, router: Arc<TriggerRouter>) -> Self {
        Self { kind, router }
    }
}

impl<K> WatchHandler<K> for KindTriggers
where
    K: Resource,
{
    fn applied(&self, object: K) {
        if let Some(key) = key_of(&object) {
            self.router.trigger(self.kind, key);
        }
    }

    fn deleted(&self, object: K) {
        WatchHandler::<K>::applied(self, object);
    }

    fn restarted(&self, objects: Vec<K>) {
        self.router
            .resync(self.kind, objects.iter().filter_map(key_of));
    }
}

/// Also keeps the router's per-namespace service registry current.
pub struct ServiceTriggers {
    router: Arc<TriggerRouter>,
}

impl ServiceTriggers {
    pub fn new(router: Arc<TriggerRouter>) -> Self {
        Self { router }
    }
}

impl WatchHandler<Service> for ServiceTriggers {
    fn applied(&self, object: Service) {
        if let Some(key) = key_of(&object) {
            self.router.service_applied(&key);
            self.router.trigger(ResourceKind::Service, key);
        }
    }

    fn deleted(&self, object: Service) {
        if let Some(key) = key_of(&object) {
            self.router.service_deleted(&key);
            self.router.trigger(ResourceKind::Service, key);
        }
    }

    fn restarted(&self, objects: Vec<Service>) {
        let keys: Vec<_> = objects.iter().filter_map(key_of).collect();
        self.router.clear_services();
        for key in &keys {
            self.router.service_applied(key);
        }
        self.router.resync(ResourceKind::Service, keys);
    }
}

/// Maintains the pod index and triggers everything a pod change affects,
/// for both its old and its new state.
pub struct PodTriggers {
    index: Arc<PodIndex>,
    router: Arc<TriggerRouter>,
}

impl PodTriggers {
    pub fn new(index: Arc<PodIndex>, router: Arc<TriggerRouter>) -> Self {
        Self { index, router }
    }
}

impl WatchHandler<Pod> for PodTriggers {
    fn applied(&self, object: Pod) {
        let Some(pod) = IndexedPod::from_pod(&object) else {
            return;
        };
        if let Some(previous) = self.index.apply_pod(pod.clone()) {
            self.router.pod_changed(&self.index, &previous);
        }
        self.router.pod_changed(&self.index, &pod);
    }

    fn deleted(&self, object: Pod) {
        let Some(pod) = IndexedPod::from_pod(&object) else {
            return;
        };
        let previous = self.index.delete_pod(&pod.key()).unwrap_or(pod);
        self.router.pod_changed(&self.index, &previous);
    }

    fn restarted(&self, objects: Vec<Pod>) {
        let pods: Vec<_> = objects.iter().filter_map(IndexedPod::from_pod).collect();
        let previous = self.index.replace_pods(pods.clone());
        for pod in previous.iter().chain(&pods) {
            self.router.pod_changed(&self.index, pod);
        }
        self.router.resync(ResourceKind::Pod, std::iter::empty());
    }
}

/// Maintains the ReplicaSet owner index; also the watcher of the
/// ReplicaSet kind itself.
pub struct ReplicaSetTriggers {
    index: Arc<PodIndex>,
    router: Arc<TriggerRouter>,
}

impl ReplicaSetTriggers {
    pub fn new(index: Arc<PodIndex>, router: Arc<TriggerRouter>) -> Self {
        Self { index, router }
    }
}

impl WatchHandler<ReplicaSet> for ReplicaSetTriggers {
    fn applied(&self, object: ReplicaSet) {
        let Some(replica_set) = IndexedReplicaSet::from_replica_set(&object) else {
            return;
        };
        if let Some(previous) = self.index.apply_replica_set(replica_set.clone()) {
            self.router.replica_set_changed(&previous);
        }
        self.router.replica_set_changed(&replica_set);
        self.router
            .trigger(ResourceKind::ReplicaSet, replica_set.key);
    }

    fn deleted(&self, object: ReplicaSet) {
        let Some(replica_set) = IndexedReplicaSet::from_replica_set(&object) else {
            return;
        };
        let previous = self
            .index
            .delete_replica_set(&replica_set.uid)
            .unwrap_or(replica_set);
        self.router.replica_set_changed(&previous);
        self.router.trigger(ResourceKind::ReplicaSet, previous.key);
    }

    fn restarted(&self, objects: Vec<ReplicaSet>) {
        let replica_sets: Vec<_> = objects
            .iter()
            .filter_map(IndexedReplicaSet::from_replica_set)
            .collect();
        let previous = self.index.replace_replica_sets(replica_sets.clone());
        for replica_set in previous.iter().chain(&replica_sets) {
            self.router.replica_set_changed(replica_set);
        }
        self.router.resync(
            ResourceKind::ReplicaSet,
            replica_sets.into_iter().map(|replica_set| replica_set.key),
        );
    }
}
