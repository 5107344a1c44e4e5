mod api;
pub mod app;
pub mod config;
pub mod core;
pub mod infrastructure;
mod util;

// Re-export main modules
pub use infrastructure::k8s;
pub use infrastructure::kube_client;
pub use infrastructure::logging;
pub use infrastructure::metrics;
