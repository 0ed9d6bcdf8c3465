//! Feature store writer: row-store upsert plus one archive file per flush.

use crate::archive::{ArchiveFile, ArchiveWriter};
use crate::encoding::set_parquet_row_group_size;
use crate::error::Result;
use crate::row_store::RowStore;
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use telemetry2store_config::{FailurePolicy, StorageConfig};
use telemetry2store_core::{TelemetryEvent, ValidationError};
use tracing::{info, warn, Instrument, Span};

/// One batch handed to a [`BatchSink`].
#[derive(Debug, Clone, Copy)]
pub struct WriteBatchRequest<'a> {
    /// Decoded events in arrival order
    pub events: &'a [TelemetryEvent],
    /// Messages dropped by the decoder while this batch was filling
    pub decode_failures: usize,
}

/// What a flush persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// Rows written to the row store
    pub rows_upserted: usize,
    /// Events excluded from the row store by normalization
    pub rejected: Vec<ValidationError>,
    /// True when the failure policy skipped the row-store write
    pub row_store_skipped: bool,
    /// Row store the accepted rows were written to
    pub row_store: Option<PathBuf>,
    /// Archive file written for the batch, if any
    pub archive: Option<ArchiveFile>,
}

/// Destination for flushed batches.
#[async_trait]
pub trait BatchSink: Send {
    async fn write_batch(&mut self, request: WriteBatchRequest<'_>) -> Result<FlushReport>;
}

pub struct FeatureStoreWriter {
    row_store: RowStore,
    archive: ArchiveWriter,
    policy: FailurePolicy,
    span: Span,
}

impl FeatureStoreWriter {
    /// Open the row store and the archive directory, creating both if needed.
    pub fn open(storage: &StorageConfig, policy: FailurePolicy, span: Span) -> Result<Self> {
        set_parquet_row_group_size(storage.parquet_row_group_size);

        let row_store = RowStore::open(&storage.row_store_path)?;
        let archive = ArchiveWriter::open(&storage.archive_dir)?;

        info!(
            parent: &span,
            row_store = %row_store.path().display(),
            archive_dir = %archive.root().display(),
            failure_policy = %policy,
            "Feature store ready"
        );

        Ok(Self {
            row_store,
            archive,
            policy,
            span,
        })
    }

    pub fn row_store(&self) -> &RowStore {
        &self.row_store
    }

    pub fn archive(&self) -> &ArchiveWriter {
        &self.archive
    }

    async fn persist(&self, request: WriteBatchRequest<'_>) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        if request.events.is_empty() {
            return Ok(report);
        }

        let mut rows = Vec::with_capacity(request.events.len());
        for event in request.events {
            match event.normalize() {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!(error = %e, "Event excluded from row store");
                    report.rejected.push(e);
                }
            }
        }

        let tainted = request.decode_failures > 0 || !report.rejected.is_empty();
        if self.policy == FailurePolicy::AbortBatch && tainted {
            warn!(
                events = request.events.len(),
                decode_failures = request.decode_failures,
                rejected = report.rejected.len(),
                "Skipping row-store write for batch with failures"
            );
            report.row_store_skipped = true;
        } else {
            report.rows_upserted = self.row_store.upsert(rows).await?;
            report.row_store = Some(self.row_store.path().to_path_buf());
        }

        let file = self.archive.write(request.events, Utc::now()).await?;
        info!(
            path = %file.path.display(),
            rows = file.rows,
            bytes = file.bytes,
            upserted = report.rows_upserted,
            "Flushed batch"
        );
        report.archive = Some(file);

        Ok(report)
    }
}

#[async_trait]
impl BatchSink for FeatureStoreWriter {
    async fn write_batch(&mut self, request: WriteBatchRequest<'_>) -> Result<FlushReport> {
        let span = self.span.clone();
        self.persist(request).instrument(span).await
    }
}
