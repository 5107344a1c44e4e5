//! In-memory source and resolver standing in for the Kubernetes API in tests.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use api_types::ResourceKind;
use async_trait::async_trait;
use error_stack::bail;
use error_stack::Report;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::core::resolver::NodeResolver;
use crate::core::source::ObjectSource;
use crate::core::types::CollectorError;
use crate::core::types::NodeSet;
use crate::core::types::ResourceKey;
use crate::core::types::TrackedObject;

pub fn nodes(names: &[&str]) -> NodeSet {
    names.iter().map(|name| name.to_string()).collect()
}

/// Object named by `key` whose `version` label stands for its content.
pub fn object(key: &ResourceKey, uid: &str, version: &str) -> TrackedObject {
    TrackedObject::new(ObjectMeta {
        name: Some(key.name.clone()),
        namespace: (!key.namespace.is_empty()).then(|| key.namespace.clone()),
        uid: Some(uid.to_string()),
        labels: Some(BTreeMap::from([(
            "version".to_string(),
            version.to_string(),
        )])),
        ..Default::default()
    })
}

pub struct FakeSource {
    kind: ResourceKind,
    objects: Mutex<HashMap<ResourceKey, TrackedObject>>,
    fail_next: AtomicBool,
    hang_next: AtomicBool,
}

impl FakeSource {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            objects: Mutex::new(HashMap::new()),
            fail_next: AtomicBool::new(false),
            hang_next: AtomicBool::new(false),
        }
    }

    pub fn put(&self, key: &ResourceKey, object: TrackedObject) {
        self.objects
            .lock()
            .expect("lock not poisoned")
            .insert(key.clone(), object);
    }

    pub fn remove(&self, key: &ResourceKey) {
        self.objects.lock().expect("lock not poisoned").remove(key);
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// The next `get` never completes.
    pub fn hang_next(&self) {
        self.hang_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectSource for FakeSource {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<TrackedObject>, Report<CollectorError>> {
        if self.hang_next.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            bail!(CollectorError::Fetch {
                kind: self.kind,
                key: key.clone(),
            });
        }
        Ok(self
            .objects
            .lock()
            .expect("lock not poisoned")
            .get(key)
            .cloned())
    }
}

/// Answers with whatever node set was last set for a key, empty otherwise.
#[derive(Default)]
pub struct FakeResolver {
    nodes: Mutex<HashMap<ResourceKey, NodeSet>>,
    fail_next: AtomicBool,
}

impl FakeResolver {
    pub fn set(&self, key: &ResourceKey, nodes: NodeSet) {
        self.nodes
            .lock()
            .expect("lock not poisoned")
            .insert(key.clone(), nodes);
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl NodeResolver for FakeResolver {
    async fn resolve(
        &self,
        key: &ResourceKey,
        _object: &TrackedObject,
    ) -> Result<NodeSet, Report<CollectorError>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            bail!(CollectorError::Resolve {
                kind: ResourceKind::Deployment,
                key: key.clone(),
            });
        }
        Ok(self
            .nodes
            .lock()
            .expect("lock not poisoned")
            .get(key)
            .cloned()
            .unwrap_or_default())
    }
}
