//! Shared API type definitions
//!
//! This crate contains the wire types exchanged between the metadata collector
//! and the node-local agents subscribed to it: the kinds of tracked resources,
//! the kinds of per-node notifications and the notification itself.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

/// Kinds of Kubernetes resources whose metadata is propagated to nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Deployment,
    ReplicaSet,
    Pod,
    Namespace,
    Service,
    ReplicationController,
}

impl ResourceKind {
    /// Every supported kind, in start-up order.
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Namespace,
        ResourceKind::Pod,
        ResourceKind::Deployment,
        ResourceKind::ReplicaSet,
        ResourceKind::ReplicationController,
        ResourceKind::Service,
    ];

    /// Kubernetes `kind` name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "Deployment",
            ResourceKind::ReplicaSet => "ReplicaSet",
            ResourceKind::Pod => "Pod",
            ResourceKind::Namespace => "Namespace",
            ResourceKind::Service => "Service",
            ResourceKind::ReplicationController => "ReplicationController",
        }
    }

    /// `apiVersion` the kind is served under.
    pub fn api_version(&self) -> &'static str {
        match self {
            ResourceKind::Deployment | ResourceKind::ReplicaSet => "apps/v1",
            ResourceKind::Pod
            | ResourceKind::Namespace
            | ResourceKind::Service
            | ResourceKind::ReplicationController => "v1",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ResourceKind::Namespace)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    /// Accepts the kind name case-insensitively, plus the usual plural and
    /// short forms (`deployments`, `rs`, `ns`, `svc`, `rc`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deployment" | "deployments" | "deploy" => Ok(ResourceKind::Deployment),
            "replicaset" | "replicasets" | "rs" => Ok(ResourceKind::ReplicaSet),
            "pod" | "pods" | "po" => Ok(ResourceKind::Pod),
            "namespace" | "namespaces" | "ns" => Ok(ResourceKind::Namespace),
            "service" | "services" | "svc" => Ok(ResourceKind::Service),
            "replicationcontroller" | "replicationcontrollers" | "rc" => {
                Ok(ResourceKind::ReplicationController)
            }
            other => Err(format!("unsupported resource kind `{other}`")),
        }
    }
}

/// Type of a per-node notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// The node starts needing the resource
    Added,
    /// The resource's metadata changed and the node already knows it
    Modified,
    /// The node no longer needs the resource
    Deleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Notification sent to the agent running on `node`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEvent {
    /// Notification type
    pub kind: EventKind,
    /// Kind of the resource the notification is about
    pub resource_kind: ResourceKind,
    /// Stable identifier of the resource
    pub uid: String,
    /// Namespace of the resource, empty for cluster-scoped resources
    pub namespace: String,
    /// Name of the resource
    pub name: String,
    /// Destination node
    pub node: String,
    /// Serialized metadata for `Added` and `Modified`, absent for `Deleted`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl MetadataEvent {
    /// `namespace/name`, or just `name` for cluster-scoped resources.
    pub fn resource_key(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }
}
