use bytes::Bytes;
use logbus::{Broker, BrokerConfig, Error, SubscriberId};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn test_broker() -> Arc<Broker> {
    let config = BrokerConfig {
        name: "test-broker".to_string(),
        ..Default::default()
    };
    Arc::new(Broker::new(config).expect("Failed to create broker"))
}

async fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[tokio::test]
async fn test_publish_then_consume_in_order() {
    let broker = test_broker();
    broker
        .create_topic("orders", Duration::from_secs(60))
        .unwrap();

    let sub = broker.create_subscriber("orders", "order-reader").unwrap();

    for payload in ["A", "B", "C"] {
        broker.publish("orders", payload).unwrap();
    }

    // Publishes are dispatched fire-and-forget; wait for all three appends
    // to land before the one-shot consume.
    let reader = SubscriberId::new("order-reader");
    assert!(
        wait_until(
            || broker.consumers_lag("orders").unwrap()[&reader] == 3,
            Duration::from_secs(2)
        )
        .await
    );

    let batch = sub.poll().unwrap();
    assert_eq!(
        batch.iter().map(|r| r.offset).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(
        batch.iter().map(|r| r.payload.clone()).collect::<Vec<_>>(),
        vec![
            Bytes::from_static(b"A"),
            Bytes::from_static(b"B"),
            Bytes::from_static(b"C")
        ]
    );

    // Caught up: an immediate second consume is empty, not an error.
    assert!(sub.poll().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_topic_is_rejected_synchronously() {
    let broker = test_broker();

    assert!(matches!(
        broker.publish("nowhere", "X").unwrap_err(),
        Error::TopicNotFound(_)
    ));
    assert!(matches!(
        broker.create_subscriber("nowhere", "s1").unwrap_err(),
        Error::TopicNotFound(_)
    ));
    assert!(matches!(
        broker.consumers_lag("nowhere").unwrap_err(),
        Error::TopicNotFound(_)
    ));
    assert!(matches!(
        broker
            .reset_offset("nowhere", &SubscriberId::new("s1"), 0)
            .unwrap_err(),
        Error::TopicNotFound(_)
    ));
    assert!(matches!(
        broker.create_publisher("nowhere").unwrap_err(),
        Error::TopicNotFound(_)
    ));

    // The failed publish must not have created anything.
    assert_eq!(broker.stats().messages_published, 0);
    assert_eq!(broker.stats().topics, 0);
}

#[tokio::test]
async fn test_lag_per_consumer() {
    let broker = test_broker();
    broker
        .create_topic("orders", Duration::from_secs(60))
        .unwrap();

    let s1 = broker.create_subscriber("orders", "s1").unwrap();
    broker.create_subscriber("orders", "s2").unwrap();

    for payload in ["A", "B", "C"] {
        broker.publish("orders", payload).unwrap();
    }
    assert!(
        wait_until(
            || broker.topic("orders").unwrap().high_water_mark() == 3,
            Duration::from_secs(2)
        )
        .await
    );

    s1.poll().unwrap();

    let lag = broker.consumers_lag("orders").unwrap();
    assert_eq!(lag[&SubscriberId::new("s1")], 0);
    assert_eq!(lag[&SubscriberId::new("s2")], 3);
}

#[tokio::test]
async fn test_reset_offset_replays_records() {
    let broker = test_broker();
    broker
        .create_topic("orders", Duration::from_secs(60))
        .unwrap();

    let sub = broker.create_subscriber("orders", "s1").unwrap();
    for payload in ["A", "B", "C"] {
        broker.publish("orders", payload).unwrap();
    }

    let first = sub.poll_wait(Duration::from_secs(2)).await.unwrap();
    let mut seen: Vec<u64> = first.iter().map(|r| r.offset).collect();
    while seen.len() < 3 {
        let more = sub.poll_wait(Duration::from_secs(2)).await.unwrap();
        seen.extend(more.iter().map(|r| r.offset));
    }
    assert_eq!(seen, vec![1, 2, 3]);

    broker
        .reset_offset("orders", &SubscriberId::new("s1"), 1)
        .unwrap();

    let replay = sub.poll().unwrap();
    assert_eq!(
        replay.iter().map(|r| r.offset).collect::<Vec<_>>(),
        vec![2, 3]
    );
}

#[tokio::test]
async fn test_retention_evicts_unread_records() {
    let broker = test_broker();
    broker
        .create_topic("ephemeral", Duration::from_millis(50))
        .unwrap();

    broker.publish("ephemeral", "gone-soon").unwrap();
    let topic = broker.topic("ephemeral").unwrap();
    assert!(wait_until(|| topic.high_water_mark() == 1, Duration::from_secs(2)).await);

    // Wait past the retention window plus a few purge cycles.
    assert!(wait_until(|| topic.depth() == 0, Duration::from_secs(2)).await);

    // A subscriber created after eviction never sees the record, and no
    // "you missed data" condition is raised.
    let late = broker.create_subscriber("ephemeral", "late").unwrap();
    assert!(late.poll().unwrap().is_empty());
    assert!(broker.stats().records_purged >= 1);
}

#[tokio::test]
async fn test_duplicate_create_and_missing_delete_are_noops() {
    let broker = test_broker();
    broker
        .create_topic("orders", Duration::from_secs(60))
        .unwrap();

    // Re-creating must not touch the existing topic or its retention.
    broker
        .create_topic("orders", Duration::from_millis(1))
        .unwrap();
    let topic = broker.topic("orders").unwrap();
    assert_eq!(topic.retention(), Duration::from_secs(60));

    // Deleting a name that was never registered is silent.
    broker.delete_topic("never-existed");
    assert_eq!(broker.stats().topics, 1);
}

#[tokio::test]
async fn test_topic_name_validation() {
    let broker = test_broker();

    assert!(matches!(
        broker.create_topic("", Duration::from_secs(1)).unwrap_err(),
        Error::InvalidTopic(_)
    ));
    let long = "t".repeat(300);
    assert!(matches!(
        broker
            .create_topic(&long, Duration::from_secs(1))
            .unwrap_err(),
        Error::TopicTooLong
    ));
}

#[tokio::test]
async fn test_publisher_handle_batches_stay_ordered() {
    let broker = test_broker();
    broker
        .create_topic("orders", Duration::from_secs(60))
        .unwrap();

    let publisher = broker.create_publisher("orders").unwrap();
    let sub = broker.create_subscriber("orders", "s1").unwrap();

    publisher.publish_batch(["A", "B", "C", "D"]).unwrap();

    let mut payloads = Vec::new();
    while payloads.len() < 4 {
        let batch = sub.poll_wait(Duration::from_secs(2)).await.unwrap();
        payloads.extend(batch.into_iter().map(|r| r.payload));
    }
    assert_eq!(
        payloads,
        vec![
            Bytes::from_static(b"A"),
            Bytes::from_static(b"B"),
            Bytes::from_static(b"C"),
            Bytes::from_static(b"D")
        ]
    );
}

#[tokio::test]
async fn test_stats_counters() {
    let broker = test_broker();
    broker
        .create_topic("orders", Duration::from_secs(60))
        .unwrap();

    let sub = broker.create_subscriber("orders", "s1").unwrap();
    for payload in ["A", "B"] {
        broker.publish("orders", payload).unwrap();
    }

    let mut delivered = 0;
    while delivered < 2 {
        delivered += sub.poll_wait(Duration::from_secs(2)).await.unwrap().len();
    }

    let stats = broker.stats();
    assert_eq!(stats.topics, 1);
    assert_eq!(stats.total_subscribers, 1);
    assert_eq!(stats.messages_published, 2);
    assert_eq!(stats.messages_delivered, 2);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = BrokerConfig {
        max_topics: 0,
        ..Default::default()
    };
    assert!(matches!(
        Broker::new(config).unwrap_err(),
        Error::InvalidConfig(_)
    ));

    let config = BrokerConfig {
        idle_poll_interval: Duration::ZERO,
        ..Default::default()
    };
    assert!(matches!(
        Broker::new(config).unwrap_err(),
        Error::InvalidConfig(_)
    ));
}
