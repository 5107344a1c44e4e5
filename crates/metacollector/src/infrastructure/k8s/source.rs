use std::fmt::Debug;

use api_types::ResourceKind;
use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::ReplicationController;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::NamespaceResourceScope;
use kube::Api;
use kube::Client;
use kube::Resource;
use serde::de::DeserializeOwned;

use crate::core::source::ObjectSource;
use crate::core::types::CollectorError;
use crate::core::types::ResourceKey;
use crate::core::types::TrackedObject;

/// Conversion of a typed Kubernetes object into what the collectors track.
pub trait IntoTracked {
    fn into_tracked(self) -> TrackedObject;
}

impl IntoTracked for Pod {
    fn into_tracked(self) -> TrackedObject {
        let node_name = self.spec.and_then(|spec| spec.node_name);
        TrackedObject::new(self.metadata).with_node_name(node_name)
    }
}

impl IntoTracked for Service {
    fn into_tracked(self) -> TrackedObject {
        let selector = self.spec.and_then(|spec| spec.selector);
        TrackedObject::new(self.metadata).with_selector(selector)
    }
}

macro_rules! metadata_only {
    ($($ty:ty),+) => {
        $(
            impl IntoTracked for $ty {
                fn into_tracked(self) -> TrackedObject {
                    TrackedObject::new(self.metadata)
                }
            }
        )+
    };
}

metadata_only!(Deployment, ReplicaSet, Namespace, ReplicationController);

/// Point lookups against the API server.
#[derive(Clone)]
pub struct KubeObjectSource {
    kind: ResourceKind,
    client: Client,
}

impl KubeObjectSource {
    pub fn new(kind: ResourceKind, client: Client) -> Self {
        Self { kind, client }
    }

    async fn get_namespaced<K>(
        &self,
        key: &ResourceKey,
    ) -> Result<Option<TrackedObject>, Report<CollectorError>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + IntoTracked
            + Clone
            + Debug
            + DeserializeOwned,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        self.fetch(api, key).await
    }

    async fn get_cluster_scoped<K>(
        &self,
        key: &ResourceKey,
    ) -> Result<Option<TrackedObject>, Report<CollectorError>>
    where
        K: Resource<DynamicType = ()> + IntoTracked + Clone + Debug + DeserializeOwned,
    {
        let api: Api<K> = Api::all(self.client.clone());
        self.fetch(api, key).await
    }

    async fn fetch<K>(
        &self,
        api: Api<K>,
        key: &ResourceKey,
    ) -> Result<Option<TrackedObject>, Report<CollectorError>>
    where
        K: Resource + IntoTracked + Clone + Debug + DeserializeOwned,
    {
        let object = api
            .get_opt(&key.name)
            .await
            .change_context_lazy(|| CollectorError::Fetch {
                kind: self.kind,
                key: key.clone(),
            })?;
        Ok(object.map(IntoTracked::into_tracked))
    }
}

#[async_trait]
impl ObjectSource for KubeObjectSource {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<TrackedObject>, Report<CollectorError>> {
        match self.kind {
            ResourceKind::Deployment => self.get_namespaced::<Deployment>(key).await,
            ResourceKind::ReplicaSet => self.get_namespaced::<ReplicaSet>(key).await,
            ResourceKind::Pod => self.get_namespaced::<Pod>(key).await,
            ResourceKind::Service => self.get_namespaced::<Service>(key).await,
            ResourceKind::ReplicationController => {
                self.get_namespaced::<ReplicationController>(key).await
            }
            ResourceKind::Namespace => self.get_cluster_scoped::<Namespace>(key).await,
        }
    }
}
