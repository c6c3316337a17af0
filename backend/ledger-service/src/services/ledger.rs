use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, warn};

use event_schema::{
    decode, topics, AuthorizationSucceeded, LedgerUpdateFailed, LedgerUpdateSucceeded,
};
use kafka_client::{InboundMessage, MessageHandler};
use transactional_outbox::enqueue_event;

const ENTRY_CREDIT_AUTHORIZED: &str = "CREDIT_AUTHORIZED";

/// Ledger participant.
///
/// Posts one `CREDIT_AUTHORIZED` entry per transaction, atomically with the
/// outcome event's outbox row. Business-rule violations on the insert are
/// terminal for the step: they emit `ledger-update-failed` (driving
/// compensation) instead of being retried.
pub struct LedgerService {
    pool: PgPool,
}

impl LedgerService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn handle_ledger_update(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        let event: AuthorizationSucceeded = match decode(&msg.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    topic = %msg.topic,
                    key = %msg.key,
                    error = %e,
                    "Discarding malformed ledger command"
                );
                return Ok(());
            }
        };

        info!(transaction_id = %event.transaction_id, "Recording ledger entry");

        let mut tx = self.pool.begin().await?;

        let insert = sqlx::query(
            r#"
            INSERT INTO ledger (transaction_id, entry_type)
            VALUES ($1, $2)
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(&event.transaction_id)
        .bind(ENTRY_CREDIT_AUTHORIZED)
        .execute(&mut *tx)
        .await;

        let inserted = match insert {
            Ok(result) => result.rows_affected(),
            Err(e) if is_business_constraint_violation(&e) => {
                // The transaction is aborted; the failure event has to go
                // out through a fresh one.
                drop(tx);
                return self
                    .record_failure(&event.transaction_id, &e.to_string())
                    .await;
            }
            Err(e) => return Err(e.into()),
        };

        if inserted == 0 {
            let stored: String =
                sqlx::query_scalar("SELECT entry_type FROM ledger WHERE transaction_id = $1")
                    .bind(&event.transaction_id)
                    .fetch_one(&mut *tx)
                    .await?;

            if stored != ENTRY_CREDIT_AUTHORIZED {
                warn!(
                    transaction_id = %event.transaction_id,
                    stored = %stored,
                    "Conflicting ledger entry; keeping stored record"
                );
                tx.commit().await?;
                return Ok(());
            }
            // Same entry: fall through and append the outbox row again, in
            // case the earlier one was lost between publish and delete.
        }

        let succeeded = LedgerUpdateSucceeded {
            transaction_id: event.transaction_id.clone(),
        };
        enqueue_event(
            &mut tx,
            topics::LEDGER_UPDATE_SUCCEEDED,
            &event.transaction_id,
            &succeeded,
        )
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn record_failure(&self, transaction_id: &str, reason: &str) -> anyhow::Result<()> {
        warn!(
            transaction_id = %transaction_id,
            reason = %reason,
            "Ledger update failed; emitting failure event"
        );

        let mut tx = self.pool.begin().await?;

        let failed = LedgerUpdateFailed {
            transaction_id: transaction_id.to_string(),
            reason: reason.to_string(),
        };
        enqueue_event(&mut tx, topics::LEDGER_UPDATE_FAILED, transaction_id, &failed).await?;

        tx.commit().await?;

        Ok(())
    }
}

/// Integrity-constraint SQLSTATE class (23xxx). The primary-key conflict
/// never reaches this check; `ON CONFLICT DO NOTHING` absorbs it.
fn is_business_constraint_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.starts_with("23"))
        .unwrap_or(false)
}

#[async_trait]
impl MessageHandler for LedgerService {
    async fn handle(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        match msg.topic.as_str() {
            topics::LEDGER_UPDATE_REQUESTS => self.handle_ledger_update(msg).await,
            other => {
                warn!(topic = %other, key = %msg.key, "Skipping message on unexpected topic");
                Ok(())
            }
        }
    }
}
