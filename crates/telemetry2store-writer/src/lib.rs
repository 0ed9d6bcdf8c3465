//! Feature store writer for telemetry2store
//!
//! Persists flushed batches twice: the normalized rows are upserted into a
//! SQLite row store keyed by event id, and the raw events are appended to
//! the archive as one Parquet file per flush.

mod archive;
mod encoding;
mod error;
mod row_store;
mod writer;

pub use archive::{ArchiveFile, ArchiveWriter};
pub use encoding::{set_parquet_row_group_size, ARCHIVE_SCHEMA_VERSION};
pub use error::{ErrorCode, Result, WriterError};
pub use row_store::RowStore;
pub use writer::{BatchSink, FeatureStoreWriter, FlushReport, WriteBatchRequest};
