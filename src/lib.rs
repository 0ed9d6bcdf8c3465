// telemetry2store - streaming telemetry ingestion worker
//
// Consumes telemetry events from a Kafka topic or a Redis stream, batches
// them, upserts the normalized rows into a SQLite feature store and appends
// every batch to a Parquet archive.

pub mod batch;
mod init;
pub mod runner;

pub use batch::{Batch, Batcher};
pub use init::init_tracing;
pub use runner::{ConsumerRunner, RunSummary, RunnerError, RunnerState};

use telemetry2store_config::RuntimeConfig;
use telemetry2store_sources::build_source;
use telemetry2store_writer::FeatureStoreWriter;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, info_span};

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

/// Run the ingest worker with a resolved configuration until a shutdown
/// signal arrives or a fatal error occurs.
pub async fn run_with_config(config: RuntimeConfig) -> Result<RunSummary, RunnerError> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });
    run_until(config, shutdown_rx).await
}

/// Like [`run_with_config`], with the shutdown trigger supplied by the caller.
pub async fn run_until(
    config: RuntimeConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<RunSummary, RunnerError> {
    let span = info_span!("telemetry2store", source = %config.source);

    info!(
        parent: &span,
        source = %config.source,
        batch_size = config.batch.size,
        failure_policy = %config.batch.failure_policy,
        "Starting ingest worker"
    );

    let writer = FeatureStoreWriter::open(
        &config.storage,
        config.batch.failure_policy,
        info_span!(parent: &span, "writer"),
    )
    .map_err(RunnerError::Storage)?;
    let source = build_source(&config, info_span!(parent: &span, "source"))?;

    let mut runner = ConsumerRunner::new(source, Box::new(writer), &config.batch, span);
    runner.run(shutdown).await
}
