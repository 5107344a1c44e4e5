//! Node resolution
//!
//! Resources reach nodes through pods: a Deployment is relevant to every node
//! running one of its pods, a Namespace to every node running a pod in it, and
//! so on. Pods are looked up through an index keyed on the owning field, never
//! by scanning all pods.

use std::collections::BTreeMap;
use std::sync::Arc;

use api_types::ResourceKind;
use async_trait::async_trait;
use error_stack::Context;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::trace;

use crate::core::types::CollectorError;
use crate::core::types::NodeSet;
use crate::core::types::ResourceKey;
use crate::core::types::TrackedObject;

/// Field a pod index is keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexedField {
    /// Pods whose owner references contain this uid
    OwnerUid(String),
    /// Pods owned by a ReplicaSet owned by the Deployment with this uid
    DeploymentUid(String),
    /// Pods whose labels contain every pair of the selector
    Selector(BTreeMap<String, String>),
    /// Every pod of the namespace
    Namespace,
}

/// What the resolver needs to know about a listed pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodDescriptor {
    pub node_name: Option<String>,
}

/// Indexed access to pods.
#[async_trait]
pub trait PodLister: Send + Sync {
    type Error: Context;

    async fn list_related_pods(
        &self,
        namespace: &str,
        field: &IndexedField,
    ) -> Result<Vec<PodDescriptor>, Report<Self::Error>>;
}

#[async_trait]
impl<L> PodLister for Arc<L>
where
    L: PodLister + ?Sized,
{
    type Error = L::Error;

    async fn list_related_pods(
        &self,
        namespace: &str,
        field: &IndexedField,
    ) -> Result<Vec<PodDescriptor>, Report<Self::Error>> {
        (**self).list_related_pods(namespace, field).await
    }
}

/// Determines which nodes currently need to know about an object.
#[async_trait]
pub trait NodeResolver: Send + Sync {
    /// An empty set is a valid answer: nothing relevant is scheduled.
    async fn resolve(
        &self,
        key: &ResourceKey,
        object: &TrackedObject,
    ) -> Result<NodeSet, Report<CollectorError>>;
}

#[async_trait]
impl<R> NodeResolver for Arc<R>
where
    R: NodeResolver + ?Sized,
{
    async fn resolve(
        &self,
        key: &ResourceKey,
        object: &TrackedObject,
    ) -> Result<NodeSet, Report<CollectorError>> {
        (**self).resolve(key, object).await
    }
}

/// How pods relevant to an object of a given kind are found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodMatcher {
    /// The object is a pod: its own node
    Itself,
    /// Pods listed in `namespace` through `field`
    Indexed {
        namespace: String,
        field: IndexedField,
    },
    /// No pod can match
    Nothing,
}

impl PodMatcher {
    pub fn for_object(kind: ResourceKind, object: &TrackedObject) -> Self {
        let namespace = object.namespace().to_string();
        match kind {
            ResourceKind::Pod => PodMatcher::Itself,
            ResourceKind::Namespace => PodMatcher::Indexed {
                namespace: object.name().to_string(),
                field: IndexedField::Namespace,
            },
            ResourceKind::Deployment => PodMatcher::Indexed {
                namespace,
                field: IndexedField::DeploymentUid(object.uid().to_string()),
            },
            ResourceKind::ReplicaSet | ResourceKind::ReplicationController => {
                PodMatcher::Indexed {
                    namespace,
                    field: IndexedField::OwnerUid(object.uid().to_string()),
                }
            }
            ResourceKind::Service => match &object.selector {
                // a service without selector has no pods of its own
                Some(selector) if !selector.is_empty() => PodMatcher::Indexed {
                    namespace,
                    field: IndexedField::Selector(selector.clone()),
                },
                _ => PodMatcher::Nothing,
            },
        }
    }
}

/// Resolves the nodes of one kind of object through a [`PodLister`].
#[derive(Debug, Clone)]
pub struct PodNodeResolver<L> {
    kind: ResourceKind,
    lister: L,
}

impl<L> PodNodeResolver<L> {
    pub fn new(kind: ResourceKind, lister: L) -> Self {
        Self { kind, lister }
    }
}

#[async_trait]
impl<L> NodeResolver for PodNodeResolver<L>
where
    L: PodLister,
{
    async fn resolve(
        &self,
        key: &ResourceKey,
        object: &TrackedObject,
    ) -> Result<NodeSet, Report<CollectorError>> {
        let nodes = match PodMatcher::for_object(self.kind, object) {
            PodMatcher::Itself => object
                .node_name
                .iter()
                .filter(|node| !node.is_empty())
                .cloned()
                .collect(),
            PodMatcher::Indexed { namespace, field } => self
                .lister
                .list_related_pods(&namespace, &field)
                .await
                .change_context_lazy(|| CollectorError::Resolve {
                    kind: self.kind,
                    key: key.clone(),
                })?
                .into_iter()
                .filter_map(|pod| pod.node_name)
                .filter(|node| !node.is_empty())
                .collect(),
            PodMatcher::Nothing => NodeSet::new(),
        };
        trace!(kind = %self.kind, key = %key, nodes = ?nodes, "Nodes resolved");
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::sync::Mutex;

    use derive_more::Display;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use similar_asserts::assert_eq;

    use super::*;

    #[derive(Debug, Display)]
    #[display("listing failed")]
    struct ListFailed;

    impl Error for ListFailed {}

    /// Records every lookup and answers with fixed pods.
    #[derive(Default)]
    struct RecordingLister {
        pods: Vec<PodDescriptor>,
        fail: bool,
        lookups: Mutex<Vec<(String, IndexedField)>>,
    }

    #[async_trait]
    impl PodLister for RecordingLister {
        type Error = ListFailed;

        async fn list_related_pods(
            &self,
            namespace: &str,
            field: &IndexedField,
        ) -> Result<Vec<PodDescriptor>, Report<ListFailed>> {
            self.lookups
                .lock()
                .expect("lock not poisoned")
                .push((namespace.to_string(), field.clone()));
            if self.fail {
                return Err(Report::new(ListFailed));
            }
            Ok(self.pods.clone())
        }
    }

    fn pod_on(node: Option<&str>) -> PodDescriptor {
        PodDescriptor {
            node_name: node.map(str::to_string),
        }
    }

    fn object(namespace: Option<&str>, name: &str, uid: &str) -> TrackedObject {
        TrackedObject::new(ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespace.map(str::to_string),
            uid: Some(uid.to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn deployment_collects_distinct_scheduled_nodes() {
        let lister = Arc::new(RecordingLister {
            pods: vec![
                pod_on(Some("a")),
                pod_on(Some("b")),
                pod_on(Some("a")),
                pod_on(None),
                pod_on(Some("")),
            ],
            ..Default::default()
        });
        let resolver = PodNodeResolver::new(ResourceKind::Deployment, Arc::clone(&lister));
        let key = ResourceKey::new("prod", "web");

        let nodes = resolver
            .resolve(&key, &object(Some("prod"), "web", "uid-d"))
            .await
            .expect("should resolve");

        assert_eq!(nodes, NodeSet::from(["a".to_string(), "b".to_string()]));
        assert_eq!(
            *lister.lookups.lock().expect("lock not poisoned"),
            vec![(
                "prod".to_string(),
                IndexedField::DeploymentUid("uid-d".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn namespace_lists_pods_in_itself() {
        let lister = Arc::new(RecordingLister::default());
        let resolver = PodNodeResolver::new(ResourceKind::Namespace, Arc::clone(&lister));
        let key = ResourceKey::cluster_scoped("prod");

        let nodes = resolver
            .resolve(&key, &object(None, "prod", "uid-ns"))
            .await
            .expect("should resolve");

        assert!(nodes.is_empty());
        assert_eq!(
            *lister.lookups.lock().expect("lock not poisoned"),
            vec![("prod".to_string(), IndexedField::Namespace)]
        );
    }

    #[tokio::test]
    async fn pod_resolves_to_its_own_node() {
        let lister = Arc::new(RecordingLister::default());
        let resolver = PodNodeResolver::new(ResourceKind::Pod, Arc::clone(&lister));
        let key = ResourceKey::new("prod", "web-1");

        let scheduled = object(Some("prod"), "web-1", "uid-p").with_node_name(Some("a".into()));
        let nodes = resolver.resolve(&key, &scheduled).await.expect("resolve");
        assert_eq!(nodes, NodeSet::from(["a".to_string()]));

        let pending = object(Some("prod"), "web-1", "uid-p");
        let nodes = resolver.resolve(&key, &pending).await.expect("resolve");
        assert!(nodes.is_empty());

        assert!(lister.lookups.lock().expect("lock not poisoned").is_empty());
    }

    #[tokio::test]
    async fn service_without_selector_matches_nothing() {
        let lister = Arc::new(RecordingLister {
            pods: vec![pod_on(Some("a"))],
            ..Default::default()
        });
        let resolver = PodNodeResolver::new(ResourceKind::Service, Arc::clone(&lister));
        let key = ResourceKey::new("prod", "db");

        let headless = object(Some("prod"), "db", "uid-s").with_selector(Some(BTreeMap::new()));
        let nodes = resolver.resolve(&key, &headless).await.expect("resolve");

        assert!(nodes.is_empty());
        assert!(lister.lookups.lock().expect("lock not poisoned").is_empty());
    }

    #[tokio::test]
    async fn listing_failure_is_a_resolve_error() {
        let lister = RecordingLister {
            fail: true,
            ..Default::default()
        };
        let resolver = PodNodeResolver::new(ResourceKind::ReplicaSet, lister);
        let key = ResourceKey::new("prod", "web-1234");

        let err = resolver
            .resolve(&key, &object(Some("prod"), "web-1234", "uid-rs"))
            .await
            .expect_err("listing fails");

        assert!(matches!(
            err.current_context(),
            CollectorError::Resolve {
                kind: ResourceKind::ReplicaSet,
                ..
            }
        ));
    }
}
