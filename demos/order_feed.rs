use logbus::{Broker, BrokerConfig, SubscriberId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TOPIC: &str = "orders";

#[derive(Serialize, Deserialize, Debug)]
struct Order {
    order_id: u64,
    symbol: String,
    quantity: u32,
    price: f64,
    placed_at: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let broker = Arc::new(Broker::new(BrokerConfig::default()).expect("Failed to create broker"));
    broker
        .create_topic(TOPIC, Duration::from_secs(60))
        .expect("Failed to create topic");

    println!("Order feed started");

    // Handler-driven consumer: prints every order as it arrives.
    let subscriber = broker
        .create_subscriber(TOPIC, "order-printer")
        .expect("Failed to create subscriber");
    subscriber.start(|record| match serde_json::from_slice::<Order>(&record.payload) {
        Ok(order) => println!(
            "offset {:>3}  #{} {} x{} @ {:.2}",
            record.offset, order.order_id, order.symbol, order.quantity, order.price
        ),
        Err(e) => println!("Failed to parse order: {}", e),
    });

    let publisher = broker
        .create_publisher(TOPIC)
        .expect("Failed to create publisher");
    let mut rng = rand::thread_rng();
    let symbols = ["AAPL", "MSFT", "TSLA", "NVDA"];

    for order_id in 1..=20 {
        let order = Order {
            order_id,
            symbol: symbols[rng.gen_range(0..symbols.len())].to_string(),
            quantity: rng.gen_range(1..500),
            price: rng.gen_range(10.0..400.0),
            placed_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs(),
        };

        let payload = serde_json::to_vec(&order).unwrap();
        publisher.publish(payload).expect("Failed to publish order");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Let the consumer drain, then report where it ended up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let lag = broker.consumers_lag(TOPIC).expect("Failed to read lag");
    println!(
        "order-printer lag: {}",
        lag.get(&SubscriberId::new("order-printer")).unwrap()
    );

    let stats = broker.stats();
    println!(
        "published: {}, delivered: {}",
        stats.messages_published, stats.messages_delivered
    );

    subscriber.stop();
    subscriber.join().await;
    broker.shutdown();
}
