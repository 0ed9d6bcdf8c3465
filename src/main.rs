use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use telemetry2store::{init_tracing, run_with_config, RunnerError};
use telemetry2store_config::RuntimeConfig;
use tracing::info;

/// Telemetry ingest worker writing a SQLite feature store and a Parquet archive
#[derive(Parser)]
#[command(name = "telemetry2store")]
#[command(version)]
#[command(about = "Telemetry ingest worker writing a SQLite feature store and a Parquet archive", long_about = None)]
struct Cli {
    /// Path to configuration file (TOML, or JSON for .json paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error (overrides config)
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Events per flush (overrides config)
    #[arg(short, long, value_name = "N")]
    batch_size: Option<usize>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    // Configuration errors surface before any connection is attempted
    let config = RuntimeConfig::load_with(cli.config.as_deref(), |config| {
        apply_cli_overrides(config, &cli)
    })
    .map_err(RunnerError::Config)
    .context("Failed to resolve configuration")?;

    init_tracing(&config.logging);

    // Build tokio runtime and run the consumer loop
    let summary = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(run_with_config(config))?;

    info!(
        records = summary.records,
        flushes = summary.flushes,
        archive_files = summary.archive_files.len(),
        "Shutdown complete"
    );
    Ok(())
}

fn apply_cli_overrides(config: &mut RuntimeConfig, cli: &Cli) {
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(size) = cli.batch_size {
        config.batch.size = size;
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<RunnerError>()
        .map(RunnerError::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn config_errors_exit_with_status_two() {
        let env: HashMap<&str, &str> = [("INGEST_SOURCE", "unknown")].into_iter().collect();
        let err = RuntimeConfig::resolve(None, &env)
            .map_err(RunnerError::Config)
            .context("Failed to resolve configuration")
            .unwrap_err();
        assert!(err.downcast_ref::<RunnerError>().is_some());
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn other_failures_exit_with_status_one() {
        let err = anyhow::Error::new(RunnerError::Storage(
            telemetry2store_writer::WriterError::write_failure("disk full".to_string()),
        ));
        assert_eq!(exit_code(&err), 1);

        let err = anyhow::anyhow!("runtime unavailable");
        assert_eq!(exit_code(&err), 1);
    }
}
