//! HTTP surface of the collector
//!
//! # API Endpoints
//!
//! - `GET {base}/events/:node_id` - SSE stream of the metadata events of a node
//! - `GET {base}/subscribers`, `GET {base}/subscribers/:node_id` - stream stats
//! - `GET {base}/stats` - delivery counters of the subscriber hub
//! - `GET /healthz` - liveness
//! - `GET /readyz` - ready once the pod index completed its initial sync

use std::error::Error;

pub mod handlers;
pub mod server;

/// API errors
#[derive(Debug, derive_more::Display)]
pub enum ApiError {
    #[display("Server error: {message}")]
    ServerError { message: String },
}

impl Error for ApiError {}
