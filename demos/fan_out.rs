use logbus::{Broker, BrokerConfig, SubscriberId};
use std::sync::Arc;
use std::time::Duration;

const TOPIC: &str = "audit";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let broker = Arc::new(Broker::new(BrokerConfig::default()).expect("Failed to create broker"));
    broker
        .create_topic(TOPIC, Duration::from_secs(30))
        .expect("Failed to create topic");

    let publisher = broker
        .create_publisher(TOPIC)
        .expect("Failed to create publisher");
    publisher
        .publish_batch(["created", "paid", "shipped", "delivered"])
        .expect("Failed to publish events");

    // Two consumers over the same log, each with its own cursor.
    let mirror = broker
        .create_subscriber(TOPIC, "mirror")
        .expect("Failed to create subscriber");
    let trail = broker
        .create_subscriber(TOPIC, SubscriberId::random())
        .expect("Failed to create subscriber");

    let batch = mirror
        .poll_wait(Duration::from_secs(1))
        .await
        .expect("mirror saw no events");
    println!("mirror consumed {} events:", batch.len());
    for record in &batch {
        println!(
            "  offset {}  {}",
            record.offset,
            String::from_utf8_lossy(&record.payload)
        );
    }

    // The mirror being caught up does not move the trail's cursor.
    let lag = broker.consumers_lag(TOPIC).expect("Failed to read lag");
    for (id, behind) in &lag {
        println!("{} lag: {}", id, behind);
    }

    let batch = trail
        .poll_wait(Duration::from_secs(1))
        .await
        .expect("trail saw no events");
    println!("trail consumed {} events", batch.len());

    // Rewind the mirror and replay everything still in the log.
    broker
        .reset_offset(TOPIC, mirror.id(), 0)
        .expect("Failed to reset offset");
    let replay = mirror.poll().expect("Failed to consume");
    println!("mirror replayed {} events from the start", replay.len());

    broker.shutdown();
}
