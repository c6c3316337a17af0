//! # Transactional Outbox
//!
//! Makes a participant's local state change and its downstream event emission
//! atomic. The handler appends the outgoing event to an `outbox` table inside
//! the same database transaction as the business row; a separate processor
//! drains the table to the broker and deletes rows only after the broker has
//! accepted them.
//!
//! This guarantees that neither side can exist without the other:
//! - a crash after commit but before publish leaves the row in the outbox,
//!   and the next drain publishes it;
//! - a crash after publish but before delete republishes the row, and the
//!   consumers' upsert-by-key discipline absorbs the duplicate.
//!
//! Delivery to the broker is therefore at-least-once; consumers MUST
//! tolerate duplicates.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sqlx::PgPool;
//! use transactional_outbox::enqueue_event;
//!
//! # #[derive(serde::Serialize)] struct Recorded { transaction_id: String }
//! async fn record(pool: &PgPool, transaction_id: &str) -> anyhow::Result<()> {
//!     let mut tx = pool.begin().await?;
//!
//!     sqlx::query("INSERT INTO authorizations (transaction_id, amount, status) VALUES ($1, $2, $3)")
//!         .bind(transaction_id)
//!         .bind(10.0_f64)
//!         .bind("SUCCEEDED")
//!         .execute(&mut *tx)
//!         .await?;
//!
//!     let event = Recorded { transaction_id: transaction_id.to_string() };
//!     enqueue_event(&mut tx, "authorization-succeeded", transaction_id, &event).await?;
//!
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```
//!
//! Multiple [`OutboxProcessor`] instances may drain one table concurrently:
//! the batch select takes row locks with `FOR UPDATE SKIP LOCKED`, so
//! instances never contend on the same rows and every row is published by
//! exactly one committed drain.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use kafka_client::Publisher;

mod error;

pub use error::{OutboxError, OutboxResult};

/// One pending event, exactly as it will reach the broker.
#[derive(Debug, Clone)]
pub struct OutboxMessage {
    /// Monotonic row id, used only for the post-publish delete.
    pub id: i64,

    /// Destination topic.
    pub topic: String,

    /// Broker message key (the transaction id).
    pub key: String,

    /// Canonical event payload, opaque to the outbox.
    pub payload: Vec<u8>,

    /// Append time; drains are ordered by it within one producer.
    pub created_at: DateTime<Utc>,
}

/// Append a raw payload to the outbox inside the caller's open transaction.
///
/// The caller commits; the row becomes visible to the processor only
/// together with the business row written in the same transaction.
pub async fn enqueue(
    tx: &mut Transaction<'_, Postgres>,
    topic: &str,
    key: &str,
    payload: &[u8],
) -> OutboxResult<()> {
    sqlx::query("INSERT INTO outbox (topic, key, payload) VALUES ($1, $2, $3)")
        .bind(topic)
        .bind(key)
        .bind(payload)
        .execute(&mut **tx)
        .await?;

    debug!(topic = %topic, key = %key, "Event appended to outbox");

    Ok(())
}

/// Serialize an event and append it to the outbox inside the caller's open
/// transaction.
pub async fn enqueue_event<T: Serialize>(
    tx: &mut Transaction<'_, Postgres>,
    topic: &str,
    key: &str,
    event: &T,
) -> OutboxResult<()> {
    let payload = serde_json::to_vec(event)?;
    enqueue(tx, topic, key, &payload).await
}

/// Periodic drainer for one participant's outbox table.
///
/// Each tick runs one SERIALIZABLE transaction: select a small locked batch
/// (skipping rows locked by sibling instances), publish in `created_at`
/// order, then delete the batch and commit. Any publish failure rolls the
/// whole batch back; the rows and their order are retained for the next
/// tick or another instance.
pub struct OutboxProcessor {
    pool: PgPool,
    publisher: Arc<dyn Publisher>,
    batch_size: i64,
    poll_interval: Duration,
}

impl OutboxProcessor {
    pub fn new(
        pool: PgPool,
        publisher: Arc<dyn Publisher>,
        batch_size: i64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            publisher,
            batch_size,
            poll_interval,
        }
    }

    /// Drain loop. Runs until the surrounding task is cancelled; errors are
    /// logged and the affected batch is retried on a later tick.
    pub async fn run(&self) {
        info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Outbox processor starting"
        );

        let mut tick = tokio::time::interval(self.poll_interval);

        loop {
            tick.tick().await;

            match self.drain_once().await {
                Ok(0) => debug!("Outbox empty"),
                Ok(count) => info!(published_count = count, "Drained outbox batch"),
                Err(e) => {
                    error!(error = ?e, "Outbox drain failed; rows retained for next tick");
                }
            }
        }
    }

    /// Process at most one batch. Returns the number of rows published and
    /// deleted.
    pub async fn drain_once(&self) -> OutboxResult<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT id, topic, key, payload, created_at
            FROM outbox
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(self.batch_size)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            return Ok(0);
        }

        let messages: Vec<OutboxMessage> = rows
            .into_iter()
            .map(|row| {
                Ok(OutboxMessage {
                    id: row.try_get("id")?,
                    topic: row.try_get("topic")?,
                    key: row.try_get("key")?,
                    payload: row.try_get("payload")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        debug!(count = messages.len(), "Fetched locked outbox batch");

        for msg in &messages {
            // An error here drops `tx`: rollback, locks released, rows kept.
            self.publisher
                .publish(&msg.topic, &msg.key, &msg.payload)
                .await?;
        }

        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();

        sqlx::query("DELETE FROM outbox WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(ids.len())
    }
}
