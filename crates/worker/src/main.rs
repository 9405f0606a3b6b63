//! `slicefarm-worker` -- competing-consumer slicing worker.
//!
//! Consumes slicing jobs from RabbitMQ one at a time, runs the external
//! slicer on each, uploads the G-code to S3, and publishes an outcome to
//! the completion queue. See [`WorkerConfig::from_env`] for the
//! environment variables it reads.
//!
//! Startup failures (bad configuration, missing slicer, unreachable
//! broker or bucket) exit non-zero. SIGINT / SIGTERM stop consumption
//! after the job in progress has been acknowledged.

use std::sync::Arc;

use anyhow::Context;
use slicefarm_pipeline::S3ArtifactStore;
use slicefarm_worker::amqp::AmqpTransport;
use slicefarm_worker::build_handler;
use slicefarm_worker::config::WorkerConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slicefarm_worker=info,slicefarm_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env().context("Invalid configuration")?;

    let store = S3ArtifactStore::connect(&config.s3).await;
    store
        .check_bucket()
        .await
        .context("Failed to reach artifact bucket")?;

    let transport = AmqpTransport::connect(&config.amqp)
        .await
        .context("Failed to connect to message broker")?;

    let completions = transport.sink(&config.amqp.done_queue);
    let dead_letter = config
        .amqp
        .dead_letter_queue
        .as_deref()
        .map(|queue| transport.sink(queue));
    let handler = build_handler(&config, Arc::new(store), completions, dead_letter)
        .context("Failed to initialise job pipeline")?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let result = transport
        .consume(&config.amqp.job_queue, &handler, cancel)
        .await;
    transport.close().await;
    result.context("Job consumer stopped")?;

    tracing::info!("Worker stopped");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), finishing current job");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, finishing current job");
        }
    }
}
