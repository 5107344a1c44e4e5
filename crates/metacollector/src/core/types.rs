//! Core type definitions for the metadata collector.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;

use api_types::ResourceKind;
use derive_more::Display;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Set of node identifiers a resource is relevant to.
pub type NodeSet = BTreeSet<String>;

/// Identifies one object within the cache of its kind.
///
/// Cluster scoped objects use an empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self::new(String::new(), name)
    }

    /// Key of the object described by `meta`, if it is named.
    pub fn from_meta(meta: &ObjectMeta) -> Option<Self> {
        let name = meta.name.as_deref()?;
        Some(Self::new(meta.namespace.as_deref().unwrap_or_default(), name))
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// An object as returned by an [`ObjectSource`](crate::core::source::ObjectSource).
///
/// Only the metadata is propagated to nodes; the remaining fields carry the
/// `.spec` fields the node resolver needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedObject {
    pub meta: ObjectMeta,
    /// `spec.selector` of a Service
    pub selector: Option<BTreeMap<String, String>>,
    /// `spec.nodeName` of a Pod
    pub node_name: Option<String>,
}

impl TrackedObject {
    pub fn new(meta: ObjectMeta) -> Self {
        Self {
            meta,
            ..Default::default()
        }
    }

    pub fn with_selector(mut self, selector: Option<BTreeMap<String, String>>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_node_name(mut self, node_name: Option<String>) -> Self {
        self.node_name = node_name;
        self
    }

    pub fn uid(&self) -> &str {
        self.meta.uid.as_deref().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.meta.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.meta.namespace.as_deref().unwrap_or_default()
    }
}

/// Errors that abort a reconciliation cycle before anything is committed.
#[derive(Debug, Display)]
pub enum CollectorError {
    #[display("Failed to fetch {kind} {key}")]
    Fetch { kind: ResourceKind, key: ResourceKey },
    #[display("Failed to resolve the nodes of {kind} {key}")]
    Resolve { kind: ResourceKind, key: ResourceKey },
    #[display("Failed to serialize the metadata of {kind} {key}")]
    Serialization { kind: ResourceKind, key: ResourceKey },
    #[display("Reconciliation of {kind} {key} cancelled")]
    Cancelled { kind: ResourceKind, key: ResourceKey },
    #[display("Subscriber join listener of {kind} closed")]
    JoinListenerClosed { kind: ResourceKind },
}

impl CollectorError {
    /// Whether the work queue should try the key again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollectorError::Fetch { .. }
                | CollectorError::Resolve { .. }
                | CollectorError::Serialization { .. }
        )
    }
}

impl Error for CollectorError {}
