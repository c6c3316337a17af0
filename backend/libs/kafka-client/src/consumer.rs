use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{ClientConfig, Offset};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{BrokerError, BrokerResult};

/// Upper bound on one handler invocation. A hung handler is treated like a
/// transient failure: the message is rewound and redelivered.
const HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after a handler failure before the rewound message is fetched
/// again, so a persistently failing dependency is not hammered.
const HANDLER_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Pause after a broker-level receive error.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Owned view of one fetched message, detached from the consumer's buffer.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

/// Per-message processing seam.
///
/// Contract: return `Err` only for transient faults that should be retried
/// via redelivery (the offset stays uncommitted). Permanently bad input must
/// be logged and swallowed with `Ok(())` so the offset commits and the
/// message drains.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: &InboundMessage) -> anyhow::Result<()>;
}

/// Group consumer with manual offset commit.
///
/// The loop is single-flight per replica: one handler invocation completes
/// (and commits or rewinds) before the next message is fetched.
pub struct EventConsumer {
    consumer: StreamConsumer,
    group_id: String,
}

impl EventConsumer {
    pub fn new(brokers: &str, group_id: &str, topics: &[&str]) -> BrokerResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(BrokerError::Client)?;

        consumer.subscribe(topics).map_err(BrokerError::Subscribe)?;

        info!(group_id = %group_id, topics = ?topics, "Kafka consumer subscribed");

        Ok(Self {
            consumer,
            group_id: group_id.to_string(),
        })
    }

    /// Consume until the surrounding task is cancelled.
    pub async fn run(&self, handler: Arc<dyn MessageHandler>) -> BrokerResult<()> {
        info!(group_id = %self.group_id, "Consumer loop started");

        loop {
            match self.consumer.recv().await {
                Ok(message) => {
                    let inbound = InboundMessage {
                        topic: message.topic().to_string(),
                        key: message
                            .key()
                            .map(|k| String::from_utf8_lossy(k).into_owned())
                            .unwrap_or_default(),
                        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                        partition: message.partition(),
                        offset: message.offset(),
                    };

                    let outcome = tokio::time::timeout(HANDLER_TIMEOUT, handler.handle(&inbound))
                        .await
                        .unwrap_or_else(|_| {
                            Err(anyhow::anyhow!(
                                "handler timed out after {}s",
                                HANDLER_TIMEOUT.as_secs()
                            ))
                        });

                    match outcome {
                        Ok(()) => {
                            if let Err(e) =
                                self.consumer.commit_message(&message, CommitMode::Async)
                            {
                                warn!(
                                    topic = %inbound.topic,
                                    offset = inbound.offset,
                                    error = %e,
                                    "Failed to commit offset; message may be redelivered"
                                );
                            }
                        }
                        Err(e) => {
                            warn!(
                                topic = %inbound.topic,
                                key = %inbound.key,
                                partition = inbound.partition,
                                offset = inbound.offset,
                                error = ?e,
                                "Handler failed; rewinding partition for redelivery"
                            );

                            // Without the rewind the next recv() would skip
                            // past the failed message even though its offset
                            // was never committed.
                            if let Err(seek_err) = self.consumer.seek(
                                &inbound.topic,
                                inbound.partition,
                                Offset::Offset(inbound.offset),
                                Duration::from_secs(5),
                            ) {
                                error!(
                                    topic = %inbound.topic,
                                    partition = inbound.partition,
                                    error = %seek_err,
                                    "Failed to rewind partition; redelivery deferred to rebalance"
                                );
                            }

                            tokio::time::sleep(HANDLER_RETRY_BACKOFF).await;
                        }
                    }
                }
                Err(e) => {
                    error!(group_id = %self.group_id, error = %e, "Kafka consumer error");
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            }
        }
    }
}
