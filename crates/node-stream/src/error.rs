//! Error types for per-node event streaming.

use core::error::Error;

use derive_more::Display;
use error_stack::Report;

/// Result type for streaming operations.
pub type CommResult<T> = Result<T, Report<CommError>>;

/// Errors that can occur while delivering items to node subscribers.
#[derive(Debug, Display)]
pub enum CommError {
    /// No stream is registered for the node
    #[display("Node {node_id} has no registered subscriber")]
    NotConnected { node_id: String },

    /// The subscriber does not drain its stream fast enough
    #[display("Subscriber queue for node {node_id} is full ({capacity} items)")]
    QueueFull { node_id: String, capacity: usize },

    /// Serialization/deserialization errors
    #[display("Serialization error: {message}")]
    Serialization { message: String },

    /// Configuration errors
    #[display("Configuration error: {message}")]
    Configuration { message: String },
}

impl Error for CommError {}
