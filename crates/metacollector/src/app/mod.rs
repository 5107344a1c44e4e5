//! Application module
//!
//! Wiring of the collectors, the Kubernetes watches, the HTTP server and the
//! background tasks.

pub mod builder;
pub mod core;
pub mod services;
pub mod tasks;

pub use builder::ApplicationBuilder;
pub use self::core::Application;
pub use services::ApplicationServices;
