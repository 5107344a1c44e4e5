//! Poem integration for `node-stream`.
//!
//! Exposes a [`SubscriberHub`] as Poem routes:
//!
//! * `GET {base_path}/events/:node_id` – SSE stream of the items routed to
//!   the node. Opening it registers the node and announces its join.
//! * `GET {base_path}/subscribers` – statistics of every connected node.
//! * `GET {base_path}/subscribers/:node_id` – statistics of one node.
//! * `GET {base_path}/stats` – hub-wide counters.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use node_stream::poem::create_routes;
//! use node_stream::SubscriberHub;
//! use poem::Route;
//! use poem::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let hub = Arc::new(SubscriberHub::<String>::new());
//!     let app = create_routes(hub, "/api/v1");
//!     let listener = poem::listener::TcpListener::bind("0.0.0.0:8080");
//!     Server::new(listener).run(app).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use async_stream::stream;
use poem::endpoint::make;
use poem::get;
use poem::http::StatusCode;
use poem::web::sse::Event;
use poem::web::sse::SSE;
use poem::web::FromRequest;
use poem::web::Json;
use poem::web::Path;
use poem::IntoResponse;
pub use poem::Route;
use tracing::info;
use tracing::warn;

use crate::server::SubscriberHub;

/// Create Poem `Route`s for the given `SubscriberHub`.
pub fn create_routes<T>(hub: Arc<SubscriberHub<T>>, base_path: &str) -> Route
where
    T: serde::Serialize + Send + 'static,
{
    // SSE events endpoint
    let hub_events = Arc::clone(&hub);
    let events_ep = make(move |req: poem::Request| {
        let hub = Arc::clone(&hub_events);
        async move {
            let Path(node_id) = Path::<String>::from_request_without_body(&req).await?;
            let keep_alive = hub.config().keep_alive;
            let mut subscription = hub.subscribe(&node_id);
            info!(node_id = %node_id, "SSE stream opened");

            let sse_stream = stream! {
                while let Some(item) = subscription.recv().await {
                    match serde_json::to_string(&item) {
                        Ok(json) => yield Event::message(json),
                        Err(err) => {
                            warn!(node_id = %subscription.node_id(), error = %err, "Failed to serialize stream item");
                        }
                    }
                }
                info!(node_id = %subscription.node_id(), "SSE stream ended");
            };

            let response = SSE::new(sse_stream).keep_alive(keep_alive).into_response();
            Ok::<poem::Response, poem::Error>(response)
        }
    });

    let hub_all = Arc::clone(&hub);
    let subscribers_ep = make(move |_req: poem::Request| {
        let hub = Arc::clone(&hub_all);
        async move { Ok::<poem::Response, poem::Error>(Json(hub.get_all_stats()).into_response()) }
    });

    let hub_one = Arc::clone(&hub);
    let subscriber_ep = make(move |req: poem::Request| {
        let hub = Arc::clone(&hub_one);
        async move {
            let Path(node_id) = Path::<String>::from_request_without_body(&req).await?;
            let response = match hub.get_subscriber_stats(&node_id) {
                Some(stats) => Json(stats).into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            };
            Ok::<poem::Response, poem::Error>(response)
        }
    });

    let hub_stats = Arc::clone(&hub);
    let stats_ep = make(move |_req: poem::Request| {
        let hub = Arc::clone(&hub_stats);
        async move { Ok::<poem::Response, poem::Error>(Json(hub.hub_stats()).into_response()) }
    });

    Route::new()
        .at(format!("{base_path}/events/:node_id"), get(events_ep))
        .at(format!("{base_path}/subscribers"), get(subscribers_ep))
        .at(format!("{base_path}/subscribers/:node_id"), get(subscriber_ep))
        .at(format!("{base_path}/stats"), get(stats_ep))
}
