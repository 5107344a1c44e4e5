//! Per-resource node association state and the node diff.
//!
//! A [`ResourceEntry`] is never mutated in place. Every reconciliation cycle
//! builds the next entry together with the events that lead to it, as a
//! [`Transition`], and the cache commits the new entry as a whole.

use std::collections::BTreeMap;

use api_types::EventKind;
use api_types::MetadataEvent;
use api_types::ResourceKind;

use crate::core::types::NodeSet;
use crate::core::types::ResourceKey;

/// Last committed state of one tracked object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    kind: ResourceKind,
    uid: String,
    fields: String,
    nodes: NodeSet,
}

impl ResourceEntry {
    /// Transition for an object seen for the first time: every node is `Added`.
    pub fn first_seen(kind: ResourceKind, uid: &str, fields: String, nodes: NodeSet) -> Transition {
        let pending = diff_nodes(&NodeSet::new(), &nodes, true);
        Transition {
            entry: Self {
                kind,
                uid: uid.to_string(),
                fields,
                nodes,
            },
            pending,
        }
    }

    /// Transition to a new snapshot of the same object.
    ///
    /// A different `uid` means the object was deleted and recreated under the
    /// same key while we were not looking; nodes that keep it see `Modified`.
    pub fn advance(&self, uid: &str, fields: String, nodes: NodeSet) -> Transition {
        let fields_changed = self.fields != fields || self.uid != uid;
        let pending = diff_nodes(&self.nodes, &nodes, fields_changed);
        Transition {
            entry: Self {
                kind: self.kind,
                uid: uid.to_string(),
                fields,
                nodes,
            },
            pending,
        }
    }

    /// Transition for an object that no longer exists: every node is `Deleted`.
    pub fn retire(&self) -> Transition {
        let nodes = NodeSet::new();
        let pending = diff_nodes(&self.nodes, &nodes, false);
        Transition {
            entry: Self {
                kind: self.kind,
                uid: self.uid.clone(),
                fields: self.fields.clone(),
                nodes,
            },
            pending,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Normalized metadata payload.
    pub fn fields(&self) -> &str {
        &self.fields
    }

    pub fn nodes(&self) -> &NodeSet {
        &self.nodes
    }

    pub fn is_associated_with(&self, node: &str) -> bool {
        self.nodes.contains(node)
    }

    /// Build the wire event telling `node` about this entry.
    pub fn event_for(&self, key: &ResourceKey, node: &str, kind: EventKind) -> MetadataEvent {
        let payload = match kind {
            EventKind::Added | EventKind::Modified => Some(self.fields.clone()),
            EventKind::Deleted => None,
        };
        MetadataEvent {
            kind,
            resource_kind: self.kind,
            uid: self.uid.clone(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            node: node.to_string(),
            payload,
        }
    }
}

/// Events owed to each node by one transition, at most one per node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingEvents(BTreeMap<String, EventKind>);

impl PendingEvents {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, node: &str) -> Option<EventKind> {
        self.0.get(node).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, EventKind)> {
        self.0.iter().map(|(node, kind)| (node.as_str(), *kind))
    }

    /// Consume the pending set into wire events for `entry`.
    pub fn into_events(self, key: &ResourceKey, entry: &ResourceEntry) -> Vec<MetadataEvent> {
        self.0
            .into_iter()
            .map(|(node, kind)| entry.event_for(key, &node, kind))
            .collect()
    }
}

/// Derive the per-node events for moving from `previous` to `current`.
///
/// Nodes only in `current` are `Added`, nodes only in `previous` are
/// `Deleted`, and nodes in both are `Modified` when the fields changed.
pub fn diff_nodes(previous: &NodeSet, current: &NodeSet, fields_changed: bool) -> PendingEvents {
    let mut pending = BTreeMap::new();
    for node in current.difference(previous) {
        pending.insert(node.clone(), EventKind::Added);
    }
    if fields_changed {
        for node in current.intersection(previous) {
            pending.insert(node.clone(), EventKind::Modified);
        }
    }
    for node in previous.difference(current) {
        pending.insert(node.clone(), EventKind::Deleted);
    }
    PendingEvents(pending)
}

/// The next entry of a resource and the events that lead to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub entry: ResourceEntry,
    pub pending: PendingEvents,
}

impl Transition {
    /// The resource is no longer relevant to any node.
    pub fn is_empty(&self) -> bool {
        self.entry.nodes.is_empty()
    }
}
