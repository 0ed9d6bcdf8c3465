use crate::error::{Result, WriterError};
use arrow::array::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::file::metadata::KeyValue;
use std::sync::OnceLock;

const DEFAULT_ROW_GROUP_SIZE: usize = 32 * 1024;
static ROW_GROUP_SIZE: OnceLock<usize> = OnceLock::new();

/// Version tag of the archive column layout.
pub const ARCHIVE_SCHEMA_VERSION: &str = "telemetry_events/v1";

/// Configure the global Parquet row group size used by archive writers.
///
/// Must be called before the first archive file is written. Subsequent calls
/// are ignored to preserve the existing writer properties cache.
pub fn set_parquet_row_group_size(row_group_size: usize) {
    if row_group_size == 0 {
        return;
    }

    let _ = ROW_GROUP_SIZE.set(row_group_size);
}

fn configured_row_group_size() -> usize {
    ROW_GROUP_SIZE
        .get()
        .copied()
        .unwrap_or(DEFAULT_ROW_GROUP_SIZE)
}

/// Get shared writer properties (cached)
///
/// - Snappy compression
/// - Dictionary encoding enabled
/// - 32k rows per group by default (configurable)
/// - Writer and schema version embedded in file metadata
pub(crate) fn writer_properties() -> &'static WriterProperties {
    static PROPERTIES: OnceLock<WriterProperties> = OnceLock::new();
    PROPERTIES.get_or_init(|| {
        let metadata = vec![
            KeyValue {
                key: "telemetry2store.version".to_string(),
                value: Some(env!("CARGO_PKG_VERSION").to_string()),
            },
            KeyValue {
                key: "telemetry2store.schema".to_string(),
                value: Some(ARCHIVE_SCHEMA_VERSION.to_string()),
            },
        ];

        WriterProperties::builder()
            .set_dictionary_enabled(true)
            .set_statistics_enabled(EnabledStatistics::Page)
            .set_compression(Compression::SNAPPY)
            .set_max_row_group_size(configured_row_group_size())
            .set_key_value_metadata(Some(metadata))
            .build()
    })
}

/// Encode one record batch as a complete Parquet file.
pub(crate) fn to_parquet_bytes(batch: &RecordBatch) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(batch.get_array_memory_size() / 2);
    let mut writer = ArrowWriter::try_new(
        &mut buffer,
        batch.schema(),
        Some(writer_properties().clone()),
    )
    .map_err(|e| WriterError::encode(e.to_string()))?;
    writer
        .write(batch)
        .map_err(|e| WriterError::encode(e.to_string()))?;
    writer
        .close()
        .map_err(|e| WriterError::encode(e.to_string()))?;
    Ok(buffer)
}
