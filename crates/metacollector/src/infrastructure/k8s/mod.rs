//! Kubernetes integration
//!
//! - [`KubeObjectSource`]: point lookups of the tracked kinds
//! - [`PodIndex`]: pods indexed by namespace and owner, the resolvers' view of
//!   the cluster
//! - [`TriggerRouter`] and the watch handlers: turn watch events into
//!   reconcile triggers

pub mod pod_index;
pub mod source;
pub mod triggers;
pub mod types;
pub mod watch;

pub use pod_index::PodIndex;
pub use source::KubeObjectSource;
pub use triggers::TriggerRouter;
pub use types::KubernetesError;
pub use watch::Watcher;
