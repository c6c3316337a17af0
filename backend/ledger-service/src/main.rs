use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use event_schema::{groups, topics};
use kafka_client::EventConsumer;
use ledger_service::{Config, LedgerService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ledger service");

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("failed to connect to postgres")?;

    tracing::info!("Connected to PostgreSQL");

    let service = Arc::new(LedgerService::new(pool));

    let consumer = EventConsumer::new(
        &config.kafka.brokers,
        groups::LEDGER,
        &[topics::LEDGER_UPDATE_REQUESTS],
    )?;

    tokio::select! {
        result = consumer.run(service) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Consumer loop terminated");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Ledger service shutting down");
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
