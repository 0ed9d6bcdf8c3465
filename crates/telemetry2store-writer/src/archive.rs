//! Append-only Parquet archive, one file per flush.
//!
//! Files are written through an OpenDAL filesystem operator rooted at the
//! archive directory and named after the flush time:
//! `telemetry_<YYYYMMDDTHHMMSS>_<micros>.parquet`. An existing file is never
//! overwritten; a `-<n>` suffix is added until the name is free.

use crate::encoding::to_parquet_bytes;
use crate::error::{Result, WriterError};
use chrono::{DateTime, Timelike, Utc};
use opendal::{ErrorKind, Operator};
use std::path::{Path, PathBuf};
use telemetry2store_core::{events_to_record_batch, TelemetryEvent};

/// A file written by [`ArchiveWriter::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    /// File name relative to the archive directory.
    pub name: String,
    /// Absolute path of the written file.
    pub path: PathBuf,
    pub rows: usize,
    pub bytes: usize,
}

#[derive(Clone)]
pub struct ArchiveWriter {
    op: Operator,
    root: PathBuf,
}

impl ArchiveWriter {
    /// Create the archive directory if needed and open an operator on it.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| WriterError::archive_unavailable(dir, e.to_string()))?;
        let root = std::fs::canonicalize(dir)
            .map_err(|e| WriterError::archive_unavailable(dir, e.to_string()))?;

        let fs_builder = opendal::services::Fs::default().root(&root.to_string_lossy());
        let op = Operator::new(fs_builder)
            .map_err(|e| {
                WriterError::archive_unavailable(
                    &root,
                    format!("Failed to create filesystem operator: {}", e),
                )
            })?
            .finish();

        Ok(Self { op, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Encode `events` and write them as a new archive file.
    pub async fn write(&self, events: &[TelemetryEvent], now: DateTime<Utc>) -> Result<ArchiveFile> {
        let batch = events_to_record_batch(events).map_err(|e| WriterError::encode(e.to_string()))?;
        let parquet_bytes = to_parquet_bytes(&batch)?;
        let bytes = parquet_bytes.len();

        let name = self.free_name(now).await?;
        tracing::debug!(path = %name, "Writing archive file");

        self.op.write(&name, parquet_bytes).await.map_err(|e| {
            WriterError::write_failure(format!(
                "Failed to write parquet bytes to '{}': {}",
                name, e
            ))
        })?;

        Ok(ArchiveFile {
            path: self.root.join(&name),
            name,
            rows: batch.num_rows(),
            bytes,
        })
    }

    async fn free_name(&self, now: DateTime<Utc>) -> Result<String> {
        let mut bump = 0u32;
        loop {
            let name = archive_file_name(now, bump);
            match self.op.stat(&name).await {
                Ok(_) => bump += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(name),
                Err(e) => {
                    return Err(WriterError::write_failure(format!(
                        "Failed to check archive path '{}': {}",
                        name, e
                    )))
                }
            }
        }
    }
}

/// `telemetry_20240501T120000_123456.parquet`, or `..._123456-2.parquet`
/// for `bump == 2`.
pub(crate) fn archive_file_name(now: DateTime<Utc>, bump: u32) -> String {
    let stamp = now.format("%Y%m%dT%H%M%S");
    let micros = now.nanosecond() / 1_000 % 1_000_000;
    if bump == 0 {
        format!("telemetry_{}_{:06}.parquet", stamp, micros)
    } else {
        format!("telemetry_{}_{:06}-{}.parquet", stamp, micros, bump)
    }
}
