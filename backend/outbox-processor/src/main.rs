use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kafka_client::EventProducer;
use transactional_outbox::OutboxProcessor;

mod config;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting outbox processor");

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("failed to connect to postgres")?;

    tracing::info!("Connected to PostgreSQL");

    let producer = Arc::new(EventProducer::new(&config.kafka.brokers)?);

    let processor = OutboxProcessor::new(
        pool,
        producer,
        config.outbox.batch_size,
        Duration::from_millis(config.outbox.tick_ms),
    );

    tokio::select! {
        _ = processor.run() => {}
        _ = shutdown_signal() => {
            tracing::info!("Outbox processor shutting down");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
