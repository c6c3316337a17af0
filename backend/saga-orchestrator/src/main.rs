use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use event_schema::{groups, topics};
use kafka_client::{EventConsumer, EventProducer};
use saga_orchestrator::{Config, Orchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting saga orchestrator");

    let config = Config::from_env()?;

    let producer = Arc::new(EventProducer::new(&config.kafka.brokers)?);
    let orchestrator = Arc::new(Orchestrator::new(producer));

    // The orchestrator listens to the initial request and the outcome of
    // each step.
    let consumer = EventConsumer::new(
        &config.kafka.brokers,
        groups::SAGA_ORCHESTRATOR,
        &[
            topics::CREDIT_AUTHORIZATION_REQUESTED,
            topics::AUTHORIZATION_SUCCEEDED,
            topics::AUTHORIZATION_FAILED,
            topics::LEDGER_UPDATE_SUCCEEDED,
            topics::LEDGER_UPDATE_FAILED,
        ],
    )?;

    tokio::select! {
        result = consumer.run(orchestrator) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Consumer loop terminated");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Saga orchestrator shutting down");
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
