//! Adapters to the outside world: the Kubernetes API, logging and metrics.

pub mod k8s;
pub mod kube_client;
pub mod logging;
pub mod metrics;
