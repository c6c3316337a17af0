use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use event_schema::{
    decode, topics, AuthorizationFailed, AuthorizationRequested, AuthorizationReversalRequested,
    AuthorizationReversed, AuthorizationSucceeded,
};
use kafka_client::{InboundMessage, MessageHandler};
use transactional_outbox::enqueue_event;

/// Business outcome of evaluating an authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Approved,
    Declined { reason: String },
}

impl AuthorizationOutcome {
    fn status(&self) -> &'static str {
        match self {
            AuthorizationOutcome::Approved => "SUCCEEDED",
            AuthorizationOutcome::Declined { .. } => "FAILED",
        }
    }
}

/// Pluggable authorization policy.
///
/// Must be a pure function of the request (plus durable state): redelivered
/// messages are re-evaluated, and a nondeterministic policy would trip the
/// stored-outcome anomaly check instead of being absorbed.
pub trait AuthorizationPolicy: Send + Sync {
    fn evaluate(&self, request: &AuthorizationRequested) -> AuthorizationOutcome;
}

/// Reference policy: every well-formed request is approved. Real credit
/// checks plug in here.
pub struct ApproveAll;

impl AuthorizationPolicy for ApproveAll {
    fn evaluate(&self, _request: &AuthorizationRequested) -> AuthorizationOutcome {
        AuthorizationOutcome::Approved
    }
}

/// Authorization participant.
///
/// Writes the authorization record and the outcome event's outbox row in one
/// transaction; neither can exist without the other. Redeliveries hit the
/// `ON CONFLICT DO NOTHING` upsert and are absorbed.
pub struct AuthorizationService {
    pool: PgPool,
    policy: Arc<dyn AuthorizationPolicy>,
}

impl AuthorizationService {
    pub fn new(pool: PgPool) -> Self {
        Self::with_policy(pool, Arc::new(ApproveAll))
    }

    pub fn with_policy(pool: PgPool, policy: Arc<dyn AuthorizationPolicy>) -> Self {
        Self { pool, policy }
    }

    async fn handle_authorization_request(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        let request: AuthorizationRequested = match decode(&msg.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    topic = %msg.topic,
                    key = %msg.key,
                    error = %e,
                    "Discarding malformed authorization request"
                );
                return Ok(());
            }
        };

        let outcome = self.policy.evaluate(&request);
        let status = outcome.status();

        info!(
            transaction_id = %request.transaction_id,
            amount = request.amount,
            status = %status,
            "Authorizing transaction"
        );

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO authorizations (transaction_id, amount, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(&request.transaction_id)
        .bind(request.amount)
        .bind(status)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            let stored: String =
                sqlx::query_scalar("SELECT status FROM authorizations WHERE transaction_id = $1")
                    .bind(&request.transaction_id)
                    .fetch_one(&mut *tx)
                    .await?;

            if stored != status {
                warn!(
                    transaction_id = %request.transaction_id,
                    stored = %stored,
                    decided = %status,
                    "Replay decided a different outcome; keeping stored record"
                );
                tx.commit().await?;
                return Ok(());
            }
            // Same outcome: fall through and append the outbox row again, in
            // case the earlier one was lost between publish and delete.
        }

        match &outcome {
            AuthorizationOutcome::Approved => {
                let event = AuthorizationSucceeded {
                    transaction_id: request.transaction_id.clone(),
                };
                enqueue_event(
                    &mut tx,
                    topics::AUTHORIZATION_SUCCEEDED,
                    &request.transaction_id,
                    &event,
                )
                .await?;
            }
            AuthorizationOutcome::Declined { reason } => {
                let event = AuthorizationFailed {
                    transaction_id: request.transaction_id.clone(),
                    reason: reason.clone(),
                };
                enqueue_event(
                    &mut tx,
                    topics::AUTHORIZATION_FAILED,
                    &request.transaction_id,
                    &event,
                )
                .await?;
            }
        }

        tx.commit().await?;

        Ok(())
    }

    /// Compensation: record the reversal keyed by TransactionId. The original
    /// authorization record is never mutated; the reversal is a distinct row
    /// so replayed compensations are absorbed the same way as replayed
    /// requests.
    async fn handle_reversal(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        let reversal: AuthorizationReversalRequested = match decode(&msg.payload) {
            Ok(reversal) => reversal,
            Err(e) => {
                warn!(
                    topic = %msg.topic,
                    key = %msg.key,
                    error = %e,
                    "Discarding malformed reversal command"
                );
                return Ok(());
            }
        };

        info!(
            transaction_id = %reversal.transaction_id,
            reason = %reversal.reason,
            "Recording authorization reversal"
        );

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO authorization_reversals (transaction_id, reason)
            VALUES ($1, $2)
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(&reversal.transaction_id)
        .bind(&reversal.reason)
        .execute(&mut *tx)
        .await?;

        let event = AuthorizationReversed {
            transaction_id: reversal.transaction_id.clone(),
        };
        enqueue_event(
            &mut tx,
            topics::AUTHORIZATION_REVERSED,
            &reversal.transaction_id,
            &event,
        )
        .await?;

        tx.commit().await?;

        Ok(())
    }
}

#[async_trait]
impl MessageHandler for AuthorizationService {
    async fn handle(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        match msg.topic.as_str() {
            topics::AUTHORIZATION_REQUESTS => self.handle_authorization_request(msg).await,
            topics::AUTHORIZATION_REVERSAL => self.handle_reversal(msg).await,
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

    #[test]
    fn outcome_maps_to_record_status() {
        assert_eq!(AuthorizationOutcome::Approved.status(), "SUCCEEDED");
        assert_eq!(
            AuthorizationOutcome::Declined {
                reason: "over limit".to_string()
            }
            .status(),
            "FAILED"
        );
    }

    #[test]
    fn reference_policy_approves_everything() {
        let request = AuthorizationRequested {
            transaction_id: "t1".to_string(),
            user_id: "u1".to_string(),
            amount: 1_000_000.0,
        };

        assert_eq!(
            ApproveAll.evaluate(&request),
            AuthorizationOutcome::Approved
        );
    }
}
