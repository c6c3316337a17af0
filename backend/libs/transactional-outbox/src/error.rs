//! Error types for the transactional outbox library.

use thiserror::Error;

/// Result type alias for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur while appending to or draining the outbox.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to publish a drained row to the broker
    #[error("Publish failed: {0}")]
    Publish(#[from] kafka_client::BrokerError),

    /// Event payload could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
