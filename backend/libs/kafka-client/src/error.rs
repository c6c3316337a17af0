//! Error types for the broker adapter.

use thiserror::Error;

/// Result type alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors surfaced by the producer and consumer primitives.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Client could not be created from the given configuration.
    #[error("failed to create Kafka client: {0}")]
    Client(#[source] rdkafka::error::KafkaError),

    /// Consumer group subscription failed.
    #[error("failed to subscribe to topics: {0}")]
    Subscribe(#[source] rdkafka::error::KafkaError),

    /// The broker did not accept a published message.
    #[error("publish to topic '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },
}
