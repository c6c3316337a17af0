/// Ingress handler: validates a charge request and enqueues the saga-start
/// event. The response body is what the idempotency barrier caches.
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use event_schema::{encode, topics, AuthorizationRequested};
use kafka_client::Publisher;

#[derive(Debug, Deserialize)]
pub struct AuthorizePayload {
    pub transaction_id: String,
    pub user_id: String,
    pub amount: f64,
}

fn validate(payload: &AuthorizePayload) -> Result<(), &'static str> {
    if payload.transaction_id.trim().is_empty() {
        return Err("transaction_id must not be empty");
    }

    if payload.user_id.trim().is_empty() {
        return Err("user_id must not be empty");
    }

    if !payload.amount.is_finite() || payload.amount < 0.0 {
        return Err("amount must be a non-negative number");
    }

    Ok(())
}

/// POST /authorize
pub async fn authorize(
    producer: web::Data<Arc<dyn Publisher>>,
    payload: web::Json<AuthorizePayload>,
) -> HttpResponse {
    if let Err(reason) = validate(&payload) {
        warn!(reason = %reason, "Rejecting authorization request");
        return HttpResponse::BadRequest().body(reason);
    }

    let event = AuthorizationRequested {
        transaction_id: payload.transaction_id.clone(),
        user_id: payload.user_id.clone(),
        amount: payload.amount,
    };

    let encoded = match encode(&event) {
        Ok(encoded) => encoded,
        Err(e) => {
            error!(error = %e, "Failed to encode authorization request");
            return HttpResponse::InternalServerError().body("failed to encode request");
        }
    };

    match producer
        .publish(
            topics::CREDIT_AUTHORIZATION_REQUESTED,
            &event.transaction_id,
            &encoded,
        )
        .await
    {
        Ok(()) => {
            info!(
                transaction_id = %event.transaction_id,
                user_id = %event.user_id,
                amount = event.amount,
                "Authorization request accepted"
            );
            HttpResponse::Accepted().body("Authorization request accepted")
        }
        Err(e) => {
            error!(
                transaction_id = %event.transaction_id,
                error = %e,
                "Failed to publish authorization request"
            );
            HttpResponse::InternalServerError().body("failed to publish authorization request")
        }
    }
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/authorize", web::post().to(authorize));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use async_trait::async_trait;
    use event_schema::decode;
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

    async fn post_authorize(
        publisher: Arc<dyn Publisher>,
        body: serde_json::Value,
    ) -> actix_web::dev::ServiceResponse {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(publisher))
                .configure(register_routes),
        )
        .await;

        test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/authorize")
                .set_json(body)
                .to_request(),
        )
        .await
    }

    #[actix_web::test]
    async fn valid_request_is_accepted_and_published() {
        let publisher = Arc::new(RecordingPublisher::default());

        let res = post_authorize(
            publisher.clone(),
            serde_json::json!({"transaction_id": "t1", "user_id": "u1", "amount": 10.0}),
        )
        .await;

        assert_eq!(res.status(), StatusCode::ACCEPTED);
        let body = test::read_body(res).await;
        assert_eq!(body, "Authorization request accepted");

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, topics::CREDIT_AUTHORIZATION_REQUESTED);
        assert_eq!(sent[0].1, "t1", "transaction id is the partition key");

        let event: AuthorizationRequested = decode(&sent[0].2).unwrap();
        assert_eq!(event.user_id, "u1");
        assert_eq!(event.amount, 10.0);
    }

    #[actix_web::test]
    async fn empty_transaction_id_is_rejected() {
        let publisher = Arc::new(RecordingPublisher::default());

        let res = post_authorize(
            publisher.clone(),
            serde_json::json!({"transaction_id": "", "user_id": "u1", "amount": 10.0}),
        )
        .await;

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(publisher.sent().is_empty(), "nothing published on 400");
    }

    #[actix_web::test]
    async fn negative_amount_is_rejected() {
        let publisher = Arc::new(RecordingPublisher::default());

        let res = post_authorize(
            publisher.clone(),
            serde_json::json!({"transaction_id": "t2", "user_id": "u1", "amount": -1.0}),
        )
        .await;

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(publisher.sent().is_empty());
    }

    #[actix_web::test]
    async fn publish_failure_returns_500() {
        let res = post_authorize(
            Arc::new(FailingPublisher),
            serde_json::json!({"transaction_id": "t3", "user_id": "u1", "amount": 1.0}),
        )
        .await;

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
