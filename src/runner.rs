// Consumer runner
//
// Drives one source into the batcher and the sink:
// INIT -> CONNECTING -> STREAMING <-> FLUSHING -> CLOSING -> STOPPED
//
// Shutdown is observed between records, never during a flush. Whatever the
// batcher holds when the stream stops is flushed once before the source is
// closed, and the source is closed on every exit path.

use crate::batch::{Batch, Batcher};
use metrics::{counter, histogram};
use std::fmt;
use std::time::{Duration, Instant};
use telemetry2store_config::{BatchConfig, ConfigError};
use telemetry2store_sources::{Polled, SourceError, StreamSource};
use telemetry2store_writer::{BatchSink, FlushReport, WriterError};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Init,
    Connecting,
    Streaming,
    Flushing,
    Closing,
    Stopped,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunnerState::Init => "init",
            RunnerState::Connecting => "connecting",
            RunnerState::Streaming => "streaming",
            RunnerState::Flushing => "flushing",
            RunnerState::Closing => "closing",
            RunnerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Fatal runner failures.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("feature store could not be opened: {0}")]
    Storage(#[source] WriterError),

    #[error("flush of batch {sequence} failed after {attempts} attempts: {source}")]
    Write {
        sequence: u64,
        attempts: u32,
        #[source]
        source: WriterError,
    },
}

impl RunnerError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunnerError::Config(_) => 2,
            RunnerError::Source(_) | RunnerError::Storage(_) | RunnerError::Write { .. } => 1,
        }
    }
}

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Events decoded and accepted into a batch
    pub records: u64,
    /// Messages dropped by the decoder
    pub decode_failures: u64,
    /// Events excluded from the row store by normalization
    pub rejected: u64,
    pub rows_upserted: u64,
    pub flushes: u64,
    /// Archive file names, in flush order
    pub archive_files: Vec<String>,
}

enum Step {
    Shutdown,
    SignalClosed,
    Polled(Result<Polled, SourceError>),
}

pub struct ConsumerRunner {
    source: Box<dyn StreamSource>,
    sink: Box<dyn BatchSink>,
    batcher: Batcher,
    flush_max_retries: u32,
    flush_retry_backoff: Duration,
    state: RunnerState,
    summary: RunSummary,
    span: Span,
}

impl ConsumerRunner {
    pub fn new(
        source: Box<dyn StreamSource>,
        sink: Box<dyn BatchSink>,
        batch: &BatchConfig,
        span: Span,
    ) -> Self {
        Self {
            source,
            sink,
            batcher: Batcher::new(batch.size),
            flush_max_retries: batch.flush_max_retries,
            flush_retry_backoff: batch.flush_retry_backoff(),
            state: RunnerState::Init,
            summary: RunSummary::default(),
            span,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Run until the source ends, `shutdown` flips to `true`, or a fatal
    /// error occurs.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary, RunnerError> {
        let span = self.span.clone();
        let result = self.run_inner(&mut shutdown).instrument(span).await;

        self.transition(RunnerState::Closing);
        if let Err(e) = self.source.close().await {
            warn!(parent: &self.span, error = %e, "Source close failed");
        }
        self.transition(RunnerState::Stopped);

        match &result {
            Ok(()) => info!(
                parent: &self.span,
                records = self.summary.records,
                decode_failures = self.summary.decode_failures,
                rejected = self.summary.rejected,
                flushes = self.summary.flushes,
                "Runner stopped"
            ),
            Err(e) => error!(parent: &self.span, error = %e, "Runner stopped with error"),
        }
        result.map(|()| self.summary.clone())
    }

    async fn run_inner(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), RunnerError> {
        self.transition(RunnerState::Connecting);
        self.source.open().await?;

        self.transition(RunnerState::Streaming);
        let consumed = self.consume(shutdown).await;

        let tail = match self.batcher.finish() {
            Some(batch) => {
                debug!(events = batch.len(), "Tail flush");
                self.flush(batch).await
            }
            None => Ok(()),
        };

        match (consumed, tail) {
            (Err(e), Err(tail_err)) => {
                error!(error = %tail_err, "Tail flush failed");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), tail) => tail,
        }
    }

    async fn consume(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), RunnerError> {
        let mut signal_open = true;
        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, draining");
                return Ok(());
            }

            let step = tokio::select! {
                biased;
                changed = shutdown.changed(), if signal_open => match changed {
                    Ok(()) => Step::Shutdown,
                    Err(_) => Step::SignalClosed,
                },
                polled = self.source.next() => Step::Polled(polled),
            };

            match step {
                // Loop head re-reads the value.
                Step::Shutdown => continue,
                Step::SignalClosed => signal_open = false,
                Step::Polled(Ok(Polled::Event(event))) => {
                    self.summary.records += 1;
                    counter!("ingest.records").increment(1);
                    if let Some(batch) = self.batcher.push(event) {
                        self.flush(batch).await?;
                    }
                }
                Step::Polled(Ok(Polled::Malformed(e))) => {
                    self.summary.decode_failures += 1;
                    counter!("ingest.dropped", "reason" => "decode").increment(1);
                    warn!(error = %e, "Dropped malformed message");
                    self.batcher.record_decode_failure();
                }
                Step::Polled(Ok(Polled::EndOfStream)) => {
                    info!("Source reached end of stream");
                    return Ok(());
                }
                Step::Polled(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn flush(&mut self, batch: Batch) -> Result<(), RunnerError> {
        self.transition(RunnerState::Flushing);
        let started = Instant::now();

        let mut attempt = 0u32;
        let report = loop {
            attempt += 1;
            match self.sink.write_batch(batch.request()).await {
                Ok(report) => break report,
                Err(e) if attempt <= self.flush_max_retries => {
                    let delay = self.flush_retry_backoff * attempt;
                    warn!(
                        batch = batch.sequence,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Flush failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(RunnerError::Write {
                        sequence: batch.sequence,
                        attempts: attempt,
                        source: e,
                    })
                }
            }
        };

        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
        self.record_flush(&batch, &report, latency_ms);
        self.transition(RunnerState::Streaming);
        Ok(())
    }

    fn record_flush(&mut self, batch: &Batch, report: &FlushReport, latency_ms: f64) {
        let rejected = report.rejected.len() as u64;
        self.summary.flushes += 1;
        self.summary.rejected += rejected;
        self.summary.rows_upserted += report.rows_upserted as u64;
        if let Some(file) = &report.archive {
            self.summary.archive_files.push(file.name.clone());
        }

        counter!("ingest.flushes").increment(1);
        if rejected > 0 {
            counter!("ingest.dropped", "reason" => "validation").increment(rejected);
        }
        histogram!("ingest.flush.latency_ms").record(latency_ms);
        histogram!("ingest.flush.rows").record(batch.len() as f64);

        info!(
            batch = batch.sequence,
            events = batch.len(),
            upserted = report.rows_upserted,
            rejected,
            decode_failures = batch.decode_failures,
            row_store_skipped = report.row_store_skipped,
            row_store = %report
                .row_store
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
            archive = %report
                .archive
                .as_ref()
                .map(|f| f.path.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
            latency_ms,
            "Flush complete"
        );
    }

    fn transition(&mut self, next: RunnerState) {
        if self.state != next {
            debug!(parent: &self.span, from = %self.state, to = %next, "State transition");
            self.state = next;
        }
    }
}
