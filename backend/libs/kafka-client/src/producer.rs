use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{BrokerError, BrokerResult};

/// How long the producer waits for broker acknowledgement before the send is
/// reported as failed.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Publishing seam used by the ingress handler, the orchestrator and the
/// outbox processor. Implementations must only return `Ok` once the broker
/// has durably accepted the message.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> BrokerResult<()>;
}

/// Kafka producer with idempotence enabled.
///
/// `enable.idempotence` plus `acks=all` means a broker-side retry cannot
/// duplicate a message within a producer session; duplicates across sessions
/// are still possible and are absorbed by the consumers' upsert discipline.
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> BrokerResult<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("message.timeout.ms", "30000")
            .create::<FutureProducer>()
            .map_err(BrokerError::Client)?;

        info!(brokers = %brokers, "Kafka producer created");

        Ok(Self { producer })
    }
}

#[async_trait]
impl Publisher for EventProducer {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> BrokerResult<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record, DELIVERY_TIMEOUT)
            .await
            .map_err(|(err, _)| BrokerError::Publish {
                topic: topic.to_string(),
                reason: err.to_string(),
            })?;

        debug!(topic = %topic, key = %key, "Message published");

        Ok(())
    }
}
