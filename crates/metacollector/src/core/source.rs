use std::sync::Arc;

use api_types::ResourceKind;
use async_trait::async_trait;
use error_stack::Report;

use crate::core::types::CollectorError;
use crate::core::types::ResourceKey;
use crate::core::types::TrackedObject;

/// Point lookups of one kind of object.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Fetch the current state of `key`. `Ok(None)` means the object does not
    /// exist, which is not an error.
    async fn get(&self, key: &ResourceKey) -> Result<Option<TrackedObject>, Report<CollectorError>>;
}

#[async_trait]
impl<S> ObjectSource for Arc<S>
where
    S: ObjectSource + ?Sized,
{
    fn kind(&self) -> ResourceKind {
        (**self).kind()
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<TrackedObject>, Report<CollectorError>> {
        (**self).get(key).await
    }
}
