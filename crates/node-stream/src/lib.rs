//! Per-node event streaming over SSE.
//!
//! A [`SubscriberHub`] keeps at most one bounded stream per node id. Producers
//! [`push`](SubscriberHub::push) items without blocking; items for nodes that
//! are not connected are rejected, never buffered. Every time a node opens a
//! stream the hub announces the join to its join listeners, which lets the
//! producer replay state the node missed.
//!
//! # Examples
//!
//! ```
//! # use node_stream::SubscriberHub;
//! # #[tokio::main]
//! # async fn main() {
//! let hub = SubscriberHub::<String>::new();
//! let mut joins = hub.join_listener();
//!
//! let mut stream = hub.subscribe("node-a");
//! assert_eq!(joins.recv().await.as_deref(), Some("node-a"));
//!
//! hub.push("node-a", "hello".to_string()).unwrap();
//! assert_eq!(stream.recv().await.as_deref(), Some("hello"));
//! # }
//! ```

pub mod config;
pub mod error;
pub mod poem;
pub mod server;
pub mod types;

pub use config::HubConfig;
pub use error::CommError;
pub use error::CommResult;
pub use poem::create_routes;
pub use poem::Route;
pub use server::SubscriberHub;
pub use server::Subscription;
pub use types::HubStats;
pub use types::SubscriberStats;
