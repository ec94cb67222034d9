use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Subscriber {subscriber} is not registered on topic {topic}")]
    UnknownSubscriber { topic: String, subscriber: String },

    #[error("Topic name too long")]
    TopicTooLong,

    #[error("Invalid topic name: {0}")]
    InvalidTopic(String),

    #[error("Topic limit exceeded")]
    TopicLimitExceeded,

    #[error("Subscriber limit exceeded for topic: {0}")]
    SubscriberLimitExceeded(String),

    #[error("Topic {0} is shutting down")]
    ShuttingDown(String),

    #[error("Operation timeout")]
    Timeout,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
