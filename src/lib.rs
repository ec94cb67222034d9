//! An in-memory broker for offset-based pub/sub messaging.
//!
//! This library provides a broker that keeps one append-only record log per
//! topic and routes messages using a publish/subscribe pattern. Subscribers
//! carry independent read cursors into their topic's log, so a slow consumer
//! never holds back a fast one. A per-topic retention task evicts records by
//! age, regardless of consumer progress.

pub mod broker;
pub mod client;
pub mod error;
mod topic;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

pub use broker::Broker;
pub use client::{Publisher, Subscriber};
pub use error::{Error, Result};
pub use topic::Topic;

/// Configuration for creating a new broker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Name of this broker instance, used in log output
    pub name: String,
    /// Maximum number of topics that can be registered
    pub max_topics: usize,
    /// Maximum subscribers per topic
    pub max_subscribers_per_topic: usize,
    /// Fallback sleep for consumer loops when nothing is ready
    pub idle_poll_interval: Duration,
    /// Lower bound on how often a topic's retention purger runs
    pub min_purge_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            name: "logbus".to_string(),
            max_topics: 1000,
            max_subscribers_per_topic: 100,
            idle_poll_interval: Duration::from_millis(10),
            min_purge_interval: Duration::from_millis(10),
        }
    }
}

/// Unique identifier for a subscriber within one topic
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SubscriberId(String);

impl SubscriberId {
    /// Create a subscriber ID from a caller-chosen name
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a new random subscriber ID
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the string representation of the subscriber ID
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A single entry in a topic's log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Position of this record within its topic, starting at 1
    pub offset: u64,
    /// The record payload
    pub payload: Bytes,
    /// Timestamp when the record was appended
    pub timestamp: SystemTime,
}

/// Statistics about the broker's operation
#[derive(Debug, Clone)]
pub struct BrokerStats {
    /// Number of currently registered topics
    pub topics: usize,
    /// Total number of subscribers across all topics
    pub total_subscribers: usize,
    /// Total number of records appended
    pub messages_published: u64,
    /// Total number of records handed to consumers
    pub messages_delivered: u64,
    /// Total number of records evicted by retention
    pub records_purged: u64,
}

/// Maximum length for topic names
pub const MAX_TOPIC_LENGTH: usize = 256;
