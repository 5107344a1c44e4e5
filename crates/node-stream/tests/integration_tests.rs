//! Integration tests for the node-stream Poem routes

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use node_stream::create_routes;
use node_stream::HubStats;
use node_stream::SubscriberHub;
use node_stream::SubscriberStats;
use poem::http::StatusCode;
use poem::test::TestClient;
use poem::web::sse::Event;
use serde::Deserialize;
use serde::Serialize;
use similar_asserts::assert_eq;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Notice {
    name: String,
}

fn hub() -> Arc<SubscriberHub<Notice>> {
    Arc::new(SubscriberHub::new())
}

#[tokio::test]
async fn unknown_subscriber_is_not_found() {
    let hub = hub();
    let client = TestClient::new(create_routes(hub, "/api"));

    let resp = client.get("/api/subscribers/node-x").send().await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn subscriber_stats_list_registered_nodes() {
    let hub = hub();
    let _a = hub.register("node-a");
    let _b = hub.register("node-b");
    hub.push("node-a", Notice { name: "one".into() })
        .expect("should push");
    let client = TestClient::new(create_routes(Arc::clone(&hub), "/api"));

    let resp = client.get("/api/subscribers").send().await;
    resp.assert_status_is_ok();
    let stats: HashMap<String, SubscriberStats> = resp.json().await.value().deserialize();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats["node-a"].pending, 1);
    assert_eq!(stats["node-b"].pending, 0);

    let resp = client.get("/api/subscribers/node-a").send().await;
    resp.assert_status_is_ok();
    let one: SubscriberStats = resp.json().await.value().deserialize();
    assert_eq!(one.delivered, 1);
}

#[tokio::test]
async fn hub_stats_count_drops() {
    let hub = hub();
    let _ = hub.push("node-gone", Notice { name: "lost".into() });
    let client = TestClient::new(create_routes(Arc::clone(&hub), "/api"));

    let resp = client.get("/api/stats").send().await;
    resp.assert_status_is_ok();
    let stats: HubStats = resp.json().await.value().deserialize();
    assert_eq!(stats, HubStats {
        subscribers: 0,
        joins: 0,
        dropped_not_connected: 1,
        dropped_queue_full: 0,
    });
}

#[tokio::test]
async fn opening_event_stream_announces_join_and_delivers_items() {
    let hub = hub();
    let mut joins = hub.join_listener();
    let client = TestClient::new(create_routes(Arc::clone(&hub), "/api"));

    let resp = client.get("/api/events/node-a").send().await;
    resp.assert_status_is_ok();
    assert_eq!(joins.recv().await.as_deref(), Some("node-a"));
    assert!(hub.is_connected("node-a"));

    hub.push("node-a", Notice { name: "first".into() })
        .expect("should push");

    let mut events = resp.sse_stream();
    let Some(Event::Message { data: value, .. }) = events.next().await else {
        panic!("expected a message event");
    };
    let notice: Notice = serde_json::from_str(&value).expect("valid json");
    assert_eq!(notice, Notice {
        name: "first".into()
    });
}
