pub(crate) mod log;

use crate::client::{Publisher, Subscriber};
use crate::error::{Error, Result};
use crate::{BrokerConfig, BrokerStats, SubscriberId, Topic, MAX_TOPIC_LENGTH};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Statistics counters shared between the broker and its topics
#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) messages_published: AtomicU64,
    pub(crate) messages_delivered: AtomicU64,
    pub(crate) records_purged: AtomicU64,
}

/// The broker owns the topic registry and is the entry point for topic
/// lifecycle, publishing, and subscriber creation.
///
/// There is no process-global instance: construct one broker at startup and
/// hand it out (behind an `Arc`) to whoever needs topic access.
pub struct Broker {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    counters: Arc<Counters>,
    config: BrokerConfig,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("config", &self.config)
            .field(
                "shutting_down",
                &self.shutting_down.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

fn validate_topic_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidTopic("Topic name cannot be empty".into()));
    }
    if name.len() > MAX_TOPIC_LENGTH {
        return Err(Error::TopicTooLong);
    }
    Ok(())
}

impl Broker {
    /// Create a new broker instance
    pub fn new(config: BrokerConfig) -> Result<Self> {
        info!("Creating new broker with config: {:?}", config);

        if config.max_topics == 0 {
            return Err(Error::InvalidConfig("Topic limit cannot be zero".into()));
        }
        if config.idle_poll_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "Idle poll interval cannot be zero".into(),
            ));
        }
        if config.min_purge_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "Minimum purge interval cannot be zero".into(),
            ));
        }

        Ok(Self {
            topics: RwLock::new(HashMap::new()),
            counters: Arc::new(Counters::default()),
            config,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Create a topic if absent. An existing topic is left untouched: its
    /// retention is not updated and no error is raised.
    ///
    /// Spawns the topic's retention purger, so this must be called from
    /// within a Tokio runtime.
    pub fn create_topic(&self, name: &str, retention: Duration) -> Result<()> {
        validate_topic_name(name)?;
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown(self.config.name.clone()));
        }

        {
            let topics = self.topics.read();
            if topics.contains_key(name) {
                debug!(topic = name, "topic already exists, leaving it untouched");
                return Ok(());
            }
        }

        let mut topics = self.topics.write();
        if topics.contains_key(name) {
            debug!(topic = name, "topic already exists, leaving it untouched");
            return Ok(());
        }
        if topics.len() >= self.config.max_topics {
            error!(
                topic = name,
                limit = self.config.max_topics,
                "topic limit exceeded"
            );
            return Err(Error::TopicLimitExceeded);
        }

        info!(topic = name, ?retention, "creating topic");
        let topic = Topic::new(
            name.to_string(),
            retention,
            self.config.max_subscribers_per_topic,
            self.config.min_purge_interval,
            Arc::clone(&self.counters),
        );
        topics.insert(name.to_string(), topic);
        Ok(())
    }

    /// Delete a topic, stopping its purger and every consumer loop attached
    /// to it. Deleting a name that was never registered is a silent no-op.
    pub fn delete_topic(&self, name: &str) {
        let removed = self.topics.write().remove(name);
        match removed {
            Some(topic) => {
                info!(topic = name, "deleting topic");
                topic.shutdown();
            }
            None => warn!(topic = name, "attempted to delete non-existent topic"),
        }
    }

    /// Look up a registered topic by name
    pub fn topic(&self, name: &str) -> Result<Arc<Topic>> {
        self.topics
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TopicNotFound(name.to_string()))
    }

    /// Publish a payload to a named topic.
    ///
    /// The topic lookup is synchronous, so an unknown name fails
    /// immediately and no record is created anywhere. The append itself is
    /// dispatched fire-and-forget to a background task, so the caller never
    /// waits on log contention. Must be called from within a Tokio runtime.
    pub fn publish(&self, name: &str, payload: impl Into<Bytes>) -> Result<()> {
        let topic = self.topic(name)?;
        let payload = payload.into();
        debug!(topic = name, bytes = payload.len(), "dispatching publish");
        tokio::spawn(async move {
            if let Err(e) = topic.append(payload) {
                warn!("dropping publish: {}", e);
            }
        });
        Ok(())
    }

    /// Build and register a subscriber handle against an existing topic.
    ///
    /// An ID already registered on the topic yields a handle over the
    /// existing cursor, so a restarted consumer resumes where it left off.
    pub fn create_subscriber(
        &self,
        name: &str,
        id: impl Into<SubscriberId>,
    ) -> Result<Subscriber> {
        let topic = self.topic(name)?;
        let id = id.into();
        topic.register_subscriber(id.clone())?;
        debug!(topic = name, subscriber = %id, "created subscriber handle");
        Ok(Subscriber::new(topic, id, self.config.idle_poll_interval))
    }

    /// Build a publisher handle bound to an existing topic
    pub fn create_publisher(self: &Arc<Self>, name: &str) -> Result<Publisher> {
        self.topic(name)?;
        Ok(Publisher::new(Arc::clone(self), name.to_string()))
    }

    /// Per-subscriber lag for a named topic
    pub fn consumers_lag(&self, name: &str) -> Result<HashMap<SubscriberId, u64>> {
        Ok(self.topic(name)?.lag_per_consumer())
    }

    /// Reset a subscriber's cursor on a named topic
    pub fn reset_offset(&self, name: &str, id: &SubscriberId, offset: u64) -> Result<()> {
        self.topic(name)?.reset_offset(id, offset)
    }

    /// Get broker statistics
    pub fn stats(&self) -> BrokerStats {
        let topics = self.topics.read();
        let total_subscribers = topics.values().map(|t| t.subscriber_count()).sum();

        BrokerStats {
            topics: topics.len(),
            total_subscribers,
            messages_published: self.counters.messages_published.load(Ordering::Relaxed),
            messages_delivered: self.counters.messages_delivered.load(Ordering::Relaxed),
            records_purged: self.counters.records_purged.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Shut down every registered topic: purgers stop, consumer loops stop,
    /// further appends are rejected. Topics stay in the registry, so a late
    /// publish fails inside its dispatch task rather than as an unknown
    /// topic.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(broker = %self.config.name, "broker shutting down");
        let topics = self.topics.read();
        for topic in topics.values() {
            topic.shutdown();
        }
    }
}
