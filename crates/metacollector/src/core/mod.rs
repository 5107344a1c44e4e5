//! Reconciliation core
//!
//! Everything here is independent of the Kubernetes client: objects come in
//! through [`source::ObjectSource`], pods through [`resolver::PodLister`], and
//! events leave through the [`dispatcher::Dispatcher`].

pub mod cache;
pub mod collector;
pub mod dispatcher;
pub mod entry;
pub mod metrics;
pub mod normalize;
pub mod resolver;
pub mod source;
pub mod types;
pub mod workqueue;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::AssociationCache;
pub use collector::Collector;
pub use dispatcher::Dispatcher;
pub use entry::ResourceEntry;
pub use resolver::NodeResolver;
pub use resolver::PodLister;
pub use resolver::PodNodeResolver;
pub use source::ObjectSource;
pub use types::CollectorError;
pub use types::NodeSet;
pub use types::ResourceKey;
pub use types::TrackedObject;
pub use workqueue::WorkQueue;
