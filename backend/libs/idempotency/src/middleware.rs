use actix_web::body::{self, BoxBody, MessageBody};
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::StatusCode;
use actix_web::{Error, HttpResponse};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::store::{CachedResponse, KeyStore};

/// Request header carrying the client-supplied idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Middleware wrapping the ingress handler.
///
/// Requests without the header pass through untouched. For keyed requests,
/// an unexpired store hit replays the recorded status and body without
/// invoking the wrapped handler; a miss runs the handler, buffers the
/// response, and records it when the status is 2xx. Store failures never
/// fail the request: lookups fall back to the handler, writes are logged
/// and the live response is returned regardless.
#[derive(Clone)]
pub struct IdempotencyBarrier {
    store: Arc<dyn KeyStore>,
    ttl: Duration,
}

impl IdempotencyBarrier {
    pub fn new(store: Arc<dyn KeyStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }
}

impl<S, B> Transform<S, ServiceRequest> for IdempotencyBarrier
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = IdempotencyBarrierService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IdempotencyBarrierService {
            service: Rc::new(service),
            store: Arc::clone(&self.store),
            ttl: self.ttl,
        }))
    }
}

pub struct IdempotencyBarrierService<S> {
    service: Rc<S>,
    store: Arc<dyn KeyStore>,
    ttl: Duration,
}

impl<S, B> Service<ServiceRequest> for IdempotencyBarrierService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let store = Arc::clone(&self.store);
        let ttl = self.ttl;

        Box::pin(async move {
            let key = req
                .headers()
                .get(IDEMPOTENCY_KEY_HEADER)
                .and_then(|h| h.to_str().ok())
                .map(str::to_owned)
                .filter(|k| !k.is_empty());

            let Some(key) = key else {
                let res = service.call(req).await?;
                return Ok(res.map_into_boxed_body());
            };

            match store.get(&key).await {
                Ok(Some(cached)) => {
                    debug!(idempotency_key = %key, "Replaying cached response");

                    let (http_req, _payload) = req.into_parts();
                    let status =
                        StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
                    let response = HttpResponse::build(status).body(cached.body);

                    return Ok(ServiceResponse::new(http_req, response));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        idempotency_key = %key,
                        error = %e,
                        "Idempotency lookup failed; proceeding without cache"
                    );
                }
            }

            let res = service.call(req).await?;
            let status = res.status();

            // The response stream cannot be replayed, so buffer it: take the
            // body, record it, and reassemble the response from the bytes.
            let (http_req, http_res) = res.into_parts();
            let (head, res_body) = http_res.into_parts();

            let body_bytes = body::to_bytes(res_body).await.map_err(|e| {
                let e: Box<dyn std::error::Error> = e.into();
                actix_web::error::ErrorInternalServerError(e.to_string())
            })?;

            if status.is_success() {
                let cached = CachedResponse {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body_bytes).into_owned(),
                };

                match store.put_if_absent(&key, &cached, ttl).await {
                    Ok(true) => debug!(idempotency_key = %key, "Response recorded"),
                    Ok(false) => {
                        debug!(idempotency_key = %key, "Concurrent request already recorded")
                    }
                    Err(e) => {
                        warn!(
                            idempotency_key = %key,
                            error = %e,
                            "Failed to record response; returning it uncached"
                        );
                    }
                }
            }

            let http_res = head.set_body(body_bytes).map_into_boxed_body();

            Ok(ServiceResponse::new(http_req, http_res))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKeyStore;
    use crate::IdempotencyResult;
    use actix_web::{test, web, App};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct HitCounter(AtomicU32);

    async fn counting_handler(hits: web::Data<HitCounter>) -> HttpResponse {
        let n = hits.0.fetch_add(1, Ordering::SeqCst) + 1;
        HttpResponse::Accepted().body(format!("accepted #{n}"))
    }

    async fn rejecting_handler(hits: web::Data<HitCounter>) -> HttpResponse {
        hits.0.fetch_add(1, Ordering::SeqCst);
        HttpResponse::BadRequest().body("invalid request")
    }

    /// Store whose every call fails, simulating an unreachable backend.
    struct BrokenStore;

    #[async_trait]
    impl KeyStore for BrokenStore {
        async fn get(&self, _key: &str) -> IdempotencyResult<Option<CachedResponse>> {
            Err(crate::IdempotencyError::Store("unreachable".to_string()))
        }

        async fn put_if_absent(
            &self,
            _key: &str,
            _response: &CachedResponse,
            _ttl: Duration,
        ) -> IdempotencyResult<bool> {
            Err(crate::IdempotencyError::Store("unreachable".to_string()))
        }
    }

    fn barrier(store: Arc<dyn KeyStore>) -> IdempotencyBarrier {
        IdempotencyBarrier::new(store, Duration::from_secs(60))
    }

    #[actix_web::test]
    async fn replays_cached_response_without_invoking_handler() {
        let hits = web::Data::new(HitCounter(AtomicU32::new(0)));
        let app = test::init_service(
            App::new()
                .app_data(hits.clone())
                .wrap(barrier(Arc::new(MemoryKeyStore::default())))
                .route("/authorize", web::post().to(counting_handler)),
        )
        .await;

        let first = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/authorize")
                .insert_header((IDEMPOTENCY_KEY_HEADER, "k1"))
                .to_request(),
        )
        .await;
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let first_body = test::read_body(first).await;

        let second = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/authorize")
                .insert_header((IDEMPOTENCY_KEY_HEADER, "k1"))
                .to_request(),
        )
        .await;
        assert_eq!(second.status(), StatusCode::ACCEPTED);
        let second_body = test::read_body(second).await;

        assert_eq!(first_body, second_body);
        assert_eq!(hits.0.load(Ordering::SeqCst), 1, "handler ran once");
    }

    #[actix_web::test]
    async fn missing_header_passes_through_without_recording() {
        let hits = web::Data::new(HitCounter(AtomicU32::new(0)));
        let app = test::init_service(
            App::new()
                .app_data(hits.clone())
                .wrap(barrier(Arc::new(MemoryKeyStore::default())))
                .route("/authorize", web::post().to(counting_handler)),
        )
        .await;

        for _ in 0..2 {
            let res = test::call_service(
                &app,
                test::TestRequest::post().uri("/authorize").to_request(),
            )
            .await;
            assert_eq!(res.status(), StatusCode::ACCEPTED);
        }

        assert_eq!(hits.0.load(Ordering::SeqCst), 2, "no dedup without a key");
    }

    #[actix_web::test]
    async fn non_success_responses_are_not_recorded() {
        let hits = web::Data::new(HitCounter(AtomicU32::new(0)));
        let app = test::init_service(
            App::new()
                .app_data(hits.clone())
                .wrap(barrier(Arc::new(MemoryKeyStore::default())))
                .route("/authorize", web::post().to(rejecting_handler)),
        )
        .await;

        for _ in 0..2 {
            let res = test::call_service(
                &app,
                test::TestRequest::post()
                    .uri("/authorize")
                    .insert_header((IDEMPOTENCY_KEY_HEADER, "k2"))
                    .to_request(),
            )
            .await;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        }

        assert_eq!(hits.0.load(Ordering::SeqCst), 2, "failures replay nothing");
    }

    #[actix_web::test]
    async fn store_failures_do_not_fail_the_request() {
        let hits = web::Data::new(HitCounter(AtomicU32::new(0)));
        let app = test::init_service(
            App::new()
                .app_data(hits.clone())
                .wrap(barrier(Arc::new(BrokenStore)))
                .route("/authorize", web::post().to(counting_handler)),
        )
        .await;

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/authorize")
                .insert_header((IDEMPOTENCY_KEY_HEADER, "k3"))
                .to_request(),
        )
        .await;

        assert_eq!(res.status(), StatusCode::ACCEPTED);
        assert_eq!(hits.0.load(Ordering::SeqCst), 1);
    }
}
