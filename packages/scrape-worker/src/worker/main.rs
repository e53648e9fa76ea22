// Main entry point for the scrape worker

use anyhow::{Context, Result};
use scrape_worker_core::worker::{shutdown_signal, Worker};
use scrape_worker_core::Config;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scrape_worker_core=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting scrape worker");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        subject = %config.broker.subject,
        queue_group = %config.broker.queue_group,
        concurrency = config.concurrency,
        "Configuration loaded"
    );

    let worker = Worker::start(&config)
        .await
        .context("Failed to start worker")?;

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    worker.run(shutdown).await
}
