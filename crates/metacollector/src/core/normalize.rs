//! Metadata normalization
//!
//! Strips the fields that change without the object meaningfully changing, so
//! that comparing two serialized snapshots tells whether nodes need an update.

use api_types::ResourceKind;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;

use crate::core::types::CollectorError;
use crate::core::types::ResourceKey;

/// Metadata keys never propagated to nodes.
pub const VOLATILE_FIELDS: [&str; 8] = [
    "resourceVersion",
    "creationTimestamp",
    "deletionTimestamp",
    "ownerReferences",
    "finalizers",
    "generateName",
    "deletionGracePeriodSeconds",
    "managedFields",
];

/// Serialize `meta` without its volatile fields.
///
/// The output is deterministic: object keys are emitted in sorted order.
pub fn serialize_fields(
    kind: ResourceKind,
    key: &ResourceKey,
    meta: &ObjectMeta,
) -> Result<String, Report<CollectorError>> {
    let error = || CollectorError::Serialization {
        kind,
        key: key.clone(),
    };

    let mut value = serde_json::to_value(meta).change_context_lazy(error)?;
    let Value::Object(fields) = &mut value else {
        return Err(Report::new(error()).attach_printable("metadata is not a JSON object"));
    };
    for field in VOLATILE_FIELDS {
        fields.remove(field);
    }

    serde_json::to_string(&value).change_context_lazy(error)
}
