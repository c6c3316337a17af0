//! Broker adapter shared by every service in the workspace.
//!
//! Two primitives, mirroring what the services actually need from Kafka:
//!
//! - [`EventProducer`] publishes one message synchronously. An `Err` from
//!   [`Publisher::publish`] means the write must be treated as not having
//!   happened; the outbox protocol depends on that contract.
//! - [`EventConsumer`] joins a consumer group and drives a
//!   [`MessageHandler`] with manual offset commits: commit on success, rewind
//!   and redeliver on failure.
//!
//! Messages sharing a key arrive in publish order at a single consumer
//! within the group. No cross-key ordering is guaranteed.

mod consumer;
mod error;
mod producer;

pub use consumer::{EventConsumer, InboundMessage, MessageHandler};
pub use error::{BrokerError, BrokerResult};
pub use producer::{EventProducer, Publisher};
