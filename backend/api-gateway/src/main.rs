use actix_web::{middleware, web, App, HttpServer};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_gateway::handlers::register_routes;
use api_gateway::Config;
use idempotency::{DynamoKeyStore, IdempotencyBarrier, KeyStore};
use kafka_client::{EventProducer, Publisher};

#[actix_web::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting API gateway");

    let config = Config::from_env().map_err(io::Error::other)?;

    let producer: Arc<dyn Publisher> =
        Arc::new(EventProducer::new(&config.kafka.brokers).map_err(io::Error::other)?);

    let store: Arc<dyn KeyStore> = Arc::new(
        DynamoKeyStore::connect(
            config.idempotency.aws_region.clone(),
            config.idempotency.endpoint_url.clone(),
            config.idempotency.table_name.clone(),
        )
        .await,
    );
    let ttl = Duration::from_secs(config.idempotency.ttl_secs);

    let addr = format!("0.0.0.0:{}", config.app.port);
    tracing::info!(addr = %addr, "API gateway listening");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(producer.clone()))
            .wrap(middleware::Logger::default())
            .wrap(IdempotencyBarrier::new(store.clone(), ttl))
            .route("/health", web::get().to(|| async { "OK" }))
            .configure(register_routes)
    })
    .bind(&addr)?
    .run()
    .await
}
