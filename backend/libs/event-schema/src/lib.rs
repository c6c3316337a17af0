/// Event schema registry for the credit-authorization saga.
///
/// Every event exchanged between the gateway, the orchestrator and the
/// participants is defined here, together with the topic and consumer-group
/// names that form the wire contract. Each payload carries the
/// `transaction_id` as its first field; it doubles as the Kafka message key
/// end-to-end. Fields are additive only and receivers ignore unknown fields,
/// so payloads from newer producers decode on older consumers.
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Broker topic names. These are part of the public contract and must not
/// change between releases.
pub mod topics {
    /// Produced by the API gateway, consumed by the orchestrator.
    pub const CREDIT_AUTHORIZATION_REQUESTED: &str = "credit-authorization-requested";
    /// Command topic: orchestrator -> authorization participant.
    pub const AUTHORIZATION_REQUESTS: &str = "authorization-requests";
    /// Outcome topics emitted through the authorization participant's outbox.
    pub const AUTHORIZATION_SUCCEEDED: &str = "authorization-succeeded";
    pub const AUTHORIZATION_FAILED: &str = "authorization-failed";
    /// Compensation command topic: orchestrator -> authorization participant.
    pub const AUTHORIZATION_REVERSAL: &str = "authorization-reversal";
    /// Audit event emitted once a reversal record is durable.
    pub const AUTHORIZATION_REVERSED: &str = "authorization-reversed";
    /// Command topic: orchestrator -> ledger participant.
    pub const LEDGER_UPDATE_REQUESTS: &str = "ledger-update-requests";
    /// Outcome topics emitted through the ledger participant's outbox.
    pub const LEDGER_UPDATE_SUCCEEDED: &str = "ledger-update-succeeded";
    pub const LEDGER_UPDATE_FAILED: &str = "ledger-update-failed";
    /// Terminal-success notification.
    pub const SAGA_COMPLETED: &str = "saga-completed";
}

/// Consumer-group ids, one per service that consumes.
pub mod groups {
    pub const SAGA_ORCHESTRATOR: &str = "saga-orchestrator-group";
    pub const AUTHORIZATION: &str = "authorization-group";
    pub const LEDGER: &str = "ledger-group";
}

/// Submitted by a client and forwarded unchanged until the authorization
/// participant consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRequested {
    pub transaction_id: String,
    pub user_id: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationSucceeded {
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationFailed {
    pub transaction_id: String,
    pub reason: String,
}

/// Compensation command. Issued by the orchestrator when a later saga step
/// fails (or when authorization itself fails, in which case the reversal is
/// absorbed by the participant as a no-op record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationReversalRequested {
    pub transaction_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationReversed {
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerUpdateSucceeded {
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerUpdateFailed {
    pub transaction_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaCompleted {
    pub transaction_id: String,
}

/// Serialize an event to its canonical wire form (JSON, declaration field
/// order).
pub fn encode<T: Serialize>(event: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(event)
}

/// Decode a payload received from the broker. Unknown fields are ignored.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_is_first_field() {
        let event = AuthorizationRequested {
            transaction_id: "t1".to_string(),
            user_id: "u1".to_string(),
            amount: 10.0,
        };

        let json = String::from_utf8(encode(&event).unwrap()).unwrap();
        assert!(json.starts_with(r#"{"transaction_id":"t1""#));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let payload =
            br#"{"transaction_id":"t2","reason":"limit exceeded","added_in_v2":true}"#;

        let event: AuthorizationFailed = decode(payload).unwrap();
        assert_eq!(event.transaction_id, "t2");
        assert_eq!(event.reason, "limit exceeded");
    }

    #[test]
    fn request_payload_matches_ingress_contract() {
        let payload = br#"{"transaction_id":"t3","user_id":"u9","amount":42.5}"#;

        let event: AuthorizationRequested = decode(payload).unwrap();
        assert_eq!(event.user_id, "u9");
        assert_eq!(event.amount, 42.5);
    }
}
