use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::error::{IdempotencyError, IdempotencyResult};

/// Default retention for cached responses.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// The response bound to an idempotency key, replayed verbatim on retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: String,
}

/// Lookup / conditional-put seam over the backing store.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Fetch the unexpired response bound to `key`, if any.
    async fn get(&self, key: &str) -> IdempotencyResult<Option<CachedResponse>>;

    /// Bind `response` to `key` unless another writer already did.
    ///
    /// Returns `false` when the key was already bound; the caller's response
    /// stands, the stored one wins future replays.
    async fn put_if_absent(
        &self,
        key: &str,
        response: &CachedResponse,
        ttl: Duration,
    ) -> IdempotencyResult<bool>;
}

fn validate_key(key: &str) -> IdempotencyResult<()> {
    if key.is_empty() {
        return Err(IdempotencyError::InvalidKey(
            "key cannot be empty".to_string(),
        ));
    }

    if key.len() > 255 {
        return Err(IdempotencyError::InvalidKey(format!(
            "key too long: {} characters (max 255)",
            key.len()
        )));
    }

    Ok(())
}

/// DynamoDB-backed key store.
///
/// Items: `key` (partition key), `response` (JSON-encoded
/// [`CachedResponse`]), `expires_at` (epoch seconds, configured as the
/// table's TTL attribute). DynamoDB deletes expired items lazily, so reads
/// re-check `expires_at` client-side.
pub struct DynamoKeyStore {
    client: Client,
    table_name: String,
}

impl DynamoKeyStore {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// Build a client from the given region, optionally overriding the
    /// endpoint for local stacks.
    pub async fn connect(
        region: String,
        endpoint_url: Option<String>,
        table_name: impl Into<String>,
    ) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region));

        if let Some(url) = endpoint_url {
            loader = loader.endpoint_url(url);
        }

        let config = loader.load().await;

        Self::new(Client::new(&config), table_name)
    }
}

#[async_trait]
impl KeyStore for DynamoKeyStore {
    async fn get(&self, key: &str) -> IdempotencyResult<Option<CachedResponse>> {
        validate_key(key)?;

        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("key", AttributeValue::S(key.to_string()))
            .send()
            .await
            .map_err(|e| IdempotencyError::Store(e.to_string()))?;

        let Some(item) = output.item() else {
            return Ok(None);
        };

        // TTL deletion is lazy; an expired item may still be returned.
        let expires_at = item
            .get("expires_at")
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse::<i64>().ok());

        if let Some(expires_at) = expires_at {
            if expires_at <= Utc::now().timestamp() {
                debug!(key = %key, "Idempotency entry expired");
                return Ok(None);
            }
        }

        let Some(response) = item.get("response").and_then(|v| v.as_s().ok()) else {
            return Ok(None);
        };

        let cached: CachedResponse = serde_json::from_str(response)?;

        Ok(Some(cached))
    }

    async fn put_if_absent(
        &self,
        key: &str,
        response: &CachedResponse,
        ttl: Duration,
    ) -> IdempotencyResult<bool> {
        validate_key(key)?;

        let expires_at = Utc::now().timestamp() + ttl.as_secs() as i64;
        let response_json = serde_json::to_string(response)?;

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item("key", AttributeValue::S(key.to_string()))
            .item("response", AttributeValue::S(response_json))
            .item("expires_at", AttributeValue::N(expires_at.to_string()))
            .condition_expression("attribute_not_exists(#k)")
            .expression_attribute_names("#k", "key")
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(key = %key, "Idempotency entry recorded");
                Ok(true)
            }
            Err(err) => {
                let lost_race = err
                    .as_service_error()
                    .map(|e| e.is_conditional_check_failed_exception())
                    .unwrap_or(false);

                if lost_race {
                    debug!(key = %key, "Idempotency entry already bound by another writer");
                    Ok(false)
                } else {
                    Err(IdempotencyError::Store(err.to_string()))
                }
            }
        }
    }
}

/// In-process key store for tests and local runs.
#[derive(Default, Clone)]
pub struct MemoryKeyStore {
    entries: Arc<Mutex<HashMap<String, (CachedResponse, DateTime<Utc>)>>>,
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get(&self, key: &str) -> IdempotencyResult<Option<CachedResponse>> {
        validate_key(key)?;

        let mut entries = self.entries.lock().unwrap();

        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Utc::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((response, _)) => Ok(Some(response.clone())),
            None => Ok(None),
        }
    }

    async fn put_if_absent(
        &self,
        key: &str,
        response: &CachedResponse,
        ttl: Duration,
    ) -> IdempotencyResult<bool> {
        validate_key(key)?;

        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| IdempotencyError::InvalidKey(format!("invalid ttl: {e}")))?;

        let mut entries = self.entries.lock().unwrap();

        match entries.get(key) {
            Some((_, stored_expiry)) if *stored_expiry > Utc::now() => Ok(false),
            _ => {
                entries.insert(key.to_string(), (response.clone(), expires_at));
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> CachedResponse {
        CachedResponse {
            status: 202,
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn first_writer_wins() {
        let store = MemoryKeyStore::default();

        let first = store
            .put_if_absent("k1", &response("first"), Duration::from_secs(60))
            .await
            .unwrap();
        let second = store
            .put_if_absent("k1", &response("second"), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(store.get("k1").await.unwrap(), Some(response("first")));
    }

    #[tokio::test]
    async fn expired_entries_are_invisible_and_rebindable() {
        let store = MemoryKeyStore::default();

        store
            .put_if_absent("k2", &response("stale"), Duration::from_secs(0))
            .await
            .unwrap();

        assert_eq!(store.get("k2").await.unwrap(), None);

        let rebound = store
            .put_if_absent("k2", &response("fresh"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(rebound);
        assert_eq!(store.get("k2").await.unwrap(), Some(response("fresh")));
    }

    #[tokio::test]
    async fn rejects_invalid_keys() {
        let store = MemoryKeyStore::default();

        assert!(matches!(
            store.get("").await,
            Err(IdempotencyError::InvalidKey(_))
        ));
        assert!(matches!(
            store.get(&"x".repeat(256)).await,
            Err(IdempotencyError::InvalidKey(_))
        ));
    }
}
