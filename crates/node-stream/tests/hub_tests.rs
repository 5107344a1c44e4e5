use std::sync::Arc;
use std::time::Duration;

use node_stream::CommError;
use node_stream::HubConfig;
use node_stream::SubscriberHub;
use similar_asserts::assert_eq;
use test_log::test;

#[test]
fn config_rejects_zero_capacity() {
    let err = HubConfig::default()
        .with_queue_capacity(0)
        .validate()
        .expect_err("zero capacity is invalid");
    assert!(matches!(
        err.current_context(),
        CommError::Configuration { .. }
    ));

    HubConfig::default()
        .with_keep_alive(Duration::from_secs(1))
        .validate()
        .expect("defaults are valid");
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn concurrent_producers_reach_each_node_in_order() {
    let hub = Arc::new(SubscriberHub::<(usize, usize)>::with_config(
        HubConfig::default().with_queue_capacity(10_000),
    ));
    let nodes = ["node-a", "node-b", "node-c"];
    let mut subscriptions: Vec<_> = nodes.iter().map(|node| hub.register(node)).collect();

    let mut producers = Vec::new();
    for producer in 0..4 {
        let hub = Arc::clone(&hub);
        producers.push(tokio::spawn(async move {
            for seq in 0..200 {
                for node in nodes {
                    hub.push(node, (producer, seq)).expect("capacity is large enough");
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    for producer in producers {
        producer.await.expect("producer should not panic");
    }

    for subscription in &mut subscriptions {
        let mut last_seen = [None::<usize>; 4];
        let mut received = 0;
        while let Some((producer, seq)) = subscription.try_recv() {
            // each producer's items arrive in the order it pushed them
            assert!(last_seen[producer].map_or(true, |last| last < seq));
            last_seen[producer] = Some(seq);
            received += 1;
        }
        assert_eq!(received, 800);
    }
    assert_eq!(hub.hub_stats().subscribers, 3);
}

#[test(tokio::test)]
async fn evicted_node_can_resubscribe() {
    let hub = SubscriberHub::<u32>::with_config(HubConfig::default().with_queue_capacity(1));
    let mut joins = hub.join_listener();

    let _stale = hub.subscribe("node-a");
    hub.push("node-a", 1).expect("fits");
    hub.push("node-a", 2).expect_err("overflows");
    assert!(!hub.is_connected("node-a"));

    let mut fresh = hub.subscribe("node-a");
    assert_eq!(joins.recv().await.as_deref(), Some("node-a"));
    assert_eq!(joins.recv().await.as_deref(), Some("node-a"));

    hub.push("node-a", 3).expect("fresh stream accepts items");
    assert_eq!(fresh.recv().await, Some(3));
    assert_eq!(hub.hub_stats().joins, 2);
}

#[test]
fn unregister_closes_stream() {
    let hub = SubscriberHub::<u32>::new();
    let mut subscription = hub.register("node-a");

    assert!(hub.unregister("node-a"));
    assert!(!hub.unregister("node-a"));
    assert_eq!(subscription.try_recv(), None);
    assert_eq!(hub.subscribers(), Vec::<String>::new());
}
