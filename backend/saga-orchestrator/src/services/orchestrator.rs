use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use event_schema::{
    decode, encode, topics, AuthorizationFailed, AuthorizationReversalRequested,
    LedgerUpdateFailed, SagaCompleted,
};
use kafka_client::{InboundMessage, MessageHandler, Publisher};

/// Conceptual saga state, inferred from the topic a message arrives on.
///
/// The orchestrator keeps no per-transaction state; replayed transitions are
/// absorbed by the participants' upsert-by-TransactionId records. This enum
/// exists for logging only and must never become a correctness prerequisite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaPhase {
    Requested,
    Authorized,
    Completed,
    Compensating,
    Failed,
}

impl SagaPhase {
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            topics::CREDIT_AUTHORIZATION_REQUESTED => Some(SagaPhase::Requested),
            topics::AUTHORIZATION_SUCCEEDED => Some(SagaPhase::Authorized),
            topics::AUTHORIZATION_FAILED => Some(SagaPhase::Failed),
            topics::LEDGER_UPDATE_SUCCEEDED => Some(SagaPhase::Completed),
            topics::LEDGER_UPDATE_FAILED => Some(SagaPhase::Compensating),
            _ => None,
        }
    }
}

/// Stateless router: each step outcome becomes the next step's command or a
/// compensation. Publish failures propagate so the offset stays uncommitted
/// and the transition is redelivered.
pub struct Orchestrator {
    producer: Arc<dyn Publisher>,
}

impl Orchestrator {
    pub fn new(producer: Arc<dyn Publisher>) -> Self {
        Self { producer }
    }

    /// The gateway accepted a request; dispatch it to the authorization
    /// participant unchanged.
    async fn start_authorization(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        info!(transaction_id = %msg.key, "Saga started; dispatching authorization");

        self.producer
            .publish(topics::AUTHORIZATION_REQUESTS, &msg.key, &msg.payload)
            .await?;

        Ok(())
    }

    /// Authorization succeeded; drive the ledger with the same payload.
    async fn start_ledger_update(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        info!(transaction_id = %msg.key, "Authorization succeeded; dispatching ledger update");

        self.producer
            .publish(topics::LEDGER_UPDATE_REQUESTS, &msg.key, &msg.payload)
            .await?;

        Ok(())
    }

    /// A step failed; issue the reversal command. The authorization
    /// participant absorbs reversals for transactions it never authorized,
    /// so the command is safe to issue for either failure topic.
    async fn compensate(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        let (transaction_id, reason) = match msg.topic.as_str() {
            topics::AUTHORIZATION_FAILED => match decode::<AuthorizationFailed>(&msg.payload) {
                Ok(event) => (event.transaction_id, event.reason),
                Err(e) => {
                    warn!(
                        topic = %msg.topic,
                        key = %msg.key,
                        error = %e,
                        "Discarding malformed failure event"
                    );
                    return Ok(());
                }
            },
            _ => match decode::<LedgerUpdateFailed>(&msg.payload) {
                Ok(event) => (event.transaction_id, event.reason),
                Err(e) => {
                    warn!(
                        topic = %msg.topic,
                        key = %msg.key,
                        error = %e,
                        "Discarding malformed failure event"
                    );
                    return Ok(());
                }
            },
        };

        info!(
            transaction_id = %transaction_id,
            failed_step = %msg.topic,
            reason = %reason,
            "Saga failed; issuing authorization reversal"
        );

        let reversal = AuthorizationReversalRequested {
            transaction_id: transaction_id.clone(),
            reason,
        };

        self.producer
            .publish(
                topics::AUTHORIZATION_REVERSAL,
                &transaction_id,
                &encode(&reversal)?,
            )
            .await?;

        Ok(())
    }

    /// Terminal success.
    async fn complete(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        info!(transaction_id = %msg.key, "Saga completed");

        let completed = SagaCompleted {
            transaction_id: msg.key.clone(),
        };

        self.producer
            .publish(topics::SAGA_COMPLETED, &msg.key, &encode(&completed)?)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl MessageHandler for Orchestrator {
    async fn handle(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        debug!(
            topic = %msg.topic,
            key = %msg.key,
            phase = ?SagaPhase::from_topic(&msg.topic),
            "Orchestrator received message"
        );

        match msg.topic.as_str() {
            topics::CREDIT_AUTHORIZATION_REQUESTED => self.start_authorization(msg).await,
            topics::AUTHORIZATION_SUCCEEDED => self.start_ledger_update(msg).await,
            topics::LEDGER_UPDATE_SUCCEEDED => self.complete(msg).await,
            topics::AUTHORIZATION_FAILED | topics::LEDGER_UPDATE_FAILED => {
                self.compensate(msg).await
            }
            other => {
                warn!(topic = %other, key = %msg.key, "Skipping message on unexpected topic");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_schema::AuthorizationRequested;
    use kafka_client::{BrokerError, BrokerResult};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, String, Vec<u8>)>>,
    }

    impl RecordingPublisher {
        fn sent(&self) -> Vec<(String, String, Vec<u8>)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> BrokerResult<()> {
            self.sent
                .lock()
                .unwrap()
                .push((topic.to_string(), key.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    struct FailingPublisher;

    #[async_trait]
    impl Publisher for FailingPublisher {
        async fn publish(&self, topic: &str, _key: &str, _payload: &[u8]) -> BrokerResult<()> {
            Err(BrokerError::Publish {
                topic: topic.to_string(),
                reason: "broker unavailable".to_string(),
            })
        }
    }

    fn inbound(topic: &str, key: &str, payload: &[u8]) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
            partition: 0,
            offset: 0,
        }
    }

    #[tokio::test]
    async fn request_is_forwarded_to_authorization() {
        let publisher = Arc::new(RecordingPublisher::default());
        let orchestrator = Orchestrator::new(publisher.clone());

        let request = AuthorizationRequested {
            transaction_id: "t1".to_string(),
            user_id: "u1".to_string(),
            amount: 10.0,
        };
        let payload = encode(&request).unwrap();

        orchestrator
            .handle(&inbound(
                topics::CREDIT_AUTHORIZATION_REQUESTED,
                "t1",
                &payload,
            ))
            .await
            .unwrap();

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, topics::AUTHORIZATION_REQUESTS);
        assert_eq!(sent[0].1, "t1");
        assert_eq!(sent[0].2, payload, "payload forwarded unchanged");
    }

    #[tokio::test]
    async fn authorization_success_drives_the_ledger() {
        let publisher = Arc::new(RecordingPublisher::default());
        let orchestrator = Orchestrator::new(publisher.clone());

        let payload = br#"{"transaction_id":"t2"}"#.to_vec();

        orchestrator
            .handle(&inbound(topics::AUTHORIZATION_SUCCEEDED, "t2", &payload))
            .await
            .unwrap();

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, topics::LEDGER_UPDATE_REQUESTS);
        assert_eq!(sent[0].1, "t2");
        assert_eq!(sent[0].2, payload);
    }

    #[tokio::test]
    async fn authorization_failure_issues_a_reversal() {
        let publisher = Arc::new(RecordingPublisher::default());
        let orchestrator = Orchestrator::new(publisher.clone());

        let payload = br#"{"transaction_id":"t3","reason":"policy declined"}"#;

        orchestrator
            .handle(&inbound(topics::AUTHORIZATION_FAILED, "t3", payload))
            .await
            .unwrap();

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, topics::AUTHORIZATION_REVERSAL);
        assert_eq!(sent[0].1, "t3");

        let reversal: AuthorizationReversalRequested = decode(&sent[0].2).unwrap();
        assert_eq!(reversal.transaction_id, "t3");
        assert_eq!(reversal.reason, "policy declined");
    }

    #[tokio::test]
    async fn ledger_failure_issues_a_reversal() {
        let publisher = Arc::new(RecordingPublisher::default());
        let orchestrator = Orchestrator::new(publisher.clone());

        let payload = br#"{"transaction_id":"t4","reason":"constraint violation"}"#;

        orchestrator
            .handle(&inbound(topics::LEDGER_UPDATE_FAILED, "t4", payload))
            .await
            .unwrap();

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, topics::AUTHORIZATION_REVERSAL);

        let reversal: AuthorizationReversalRequested = decode(&sent[0].2).unwrap();
        assert_eq!(reversal.reason, "constraint violation");
    }

    #[tokio::test]
    async fn ledger_success_completes_the_saga() {
        let publisher = Arc::new(RecordingPublisher::default());
        let orchestrator = Orchestrator::new(publisher.clone());

        orchestrator
            .handle(&inbound(
                topics::LEDGER_UPDATE_SUCCEEDED,
                "t5",
                br#"{"transaction_id":"t5"}"#,
            ))
            .await
            .unwrap();

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, topics::SAGA_COMPLETED);

        let completed: SagaCompleted = decode(&sent[0].2).unwrap();
        assert_eq!(completed.transaction_id, "t5");
    }

    #[tokio::test]
    async fn unexpected_topic_is_skipped() {
        let publisher = Arc::new(RecordingPublisher::default());
        let orchestrator = Orchestrator::new(publisher.clone());

        let result = orchestrator
            .handle(&inbound("some-other-topic", "t6", b"{}"))
            .await;

        assert!(result.is_ok(), "unknown topics commit and drain");
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn malformed_failure_event_is_discarded() {
        let publisher = Arc::new(RecordingPublisher::default());
        let orchestrator = Orchestrator::new(publisher.clone());

        let result = orchestrator
            .handle(&inbound(topics::AUTHORIZATION_FAILED, "t7", b"not-json"))
            .await;

        assert!(result.is_ok(), "bad input drains rather than wedging");
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_propagates_for_redelivery() {
        let orchestrator = Orchestrator::new(Arc::new(FailingPublisher));

        let result = orchestrator
            .handle(&inbound(
                topics::CREDIT_AUTHORIZATION_REQUESTED,
                "t8",
                br#"{"transaction_id":"t8","user_id":"u8","amount":1.0}"#,
            ))
            .await;

        assert!(result.is_err(), "transient faults leave the offset uncommitted");
    }

    #[test]
    fn phase_is_inferred_from_topic() {
        assert_eq!(
            SagaPhase::from_topic(topics::CREDIT_AUTHORIZATION_REQUESTED),
            Some(SagaPhase::Requested)
        );
        assert_eq!(
            SagaPhase::from_topic(topics::AUTHORIZATION_SUCCEEDED),
            Some(SagaPhase::Authorized)
        );
        assert_eq!(
            SagaPhase::from_topic(topics::AUTHORIZATION_FAILED),
            Some(SagaPhase::Failed)
        );
        assert_eq!(
            SagaPhase::from_topic(topics::LEDGER_UPDATE_SUCCEEDED),
            Some(SagaPhase::Completed)
        );
        assert_eq!(
            SagaPhase::from_topic(topics::LEDGER_UPDATE_FAILED),
            Some(SagaPhase::Compensating)
        );
        assert_eq!(SagaPhase::from_topic("unrelated"), None);
    }
}
