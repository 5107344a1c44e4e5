use std::error::Error;

/// Errors that can occur while talking to the Kubernetes API.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Kubernetes API request failed: {message}")]
    RequestFailed { message: String },
    #[display("Failed to watch {message}")]
    WatchFailed { message: String },
    #[display("Pod index {index} has not completed its initial sync")]
    IndexNotSynced { index: &'static str },
}

impl Error for KubernetesError {}
