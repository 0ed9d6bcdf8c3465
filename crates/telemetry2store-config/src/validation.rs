// Configuration validation
//
// Validates that the selected source has its connection parameters and that
// numeric values are sensible. No side effects beyond validation.

use crate::*;
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_source(config)?;
    validate_storage_config(&config.storage)?;
    validate_batch_config(&config.batch)?;
    validate_connection_config(&config.connection)?;
    Ok(())
}

fn validate_source(config: &RuntimeConfig) -> Result<()> {
    match config.source {
        SourceKind::QueueTopic => {
            if is_blank(config.kafka.bootstrap_servers.as_deref()) {
                return Err(ConfigError::MissingParameter {
                    kind: SourceKind::QueueTopic,
                    parameter: "a bootstrap address",
                    hint: "KAFKA_BOOTSTRAP_SERVERS or kafka.bootstrap_servers",
                });
            }
            if config.kafka.topic.trim().is_empty() {
                return Err(ConfigError::MissingParameter {
                    kind: SourceKind::QueueTopic,
                    parameter: "a topic",
                    hint: "KAFKA_TOPIC or kafka.topic",
                });
            }
        }
        SourceKind::CursorLog => {
            if is_blank(config.redis.url.as_deref()) {
                return Err(ConfigError::MissingParameter {
                    kind: SourceKind::CursorLog,
                    parameter: "a URL",
                    hint: "REDIS_URL or redis.url",
                });
            }
            if config.redis.stream.trim().is_empty() {
                return Err(ConfigError::MissingParameter {
                    kind: SourceKind::CursorLog,
                    parameter: "a stream name",
                    hint: "REDIS_STREAM or redis.stream",
                });
            }
            if config.redis.count == 0 {
                return Err(invalid("redis.count", "must be greater than 0"));
            }
        }
    }
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<()> {
    if config.row_store_path.as_os_str().is_empty() {
        return Err(invalid("storage.row_store_path", "must not be empty"));
    }
    if config.archive_dir.as_os_str().is_empty() {
        return Err(invalid("storage.archive_dir", "must not be empty"));
    }
    if config.parquet_row_group_size == 0 {
        return Err(invalid(
            "storage.parquet_row_group_size",
            "must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_batch_config(config: &BatchConfig) -> Result<()> {
    if config.size == 0 {
        return Err(invalid("batch.size", "must be a positive integer"));
    }

    // Warn about very large batch sizes
    if config.size > 1_000_000 {
        warn!(
            batch_size = config.size,
            "batch.size is very large; a full batch is held in memory until flushed"
        );
    }

    Ok(())
}

fn validate_connection_config(config: &ConnectionConfig) -> Result<()> {
    if config.initial_backoff_ms > config.max_backoff_ms {
        return Err(invalid(
            "connection.initial_backoff_ms",
            "must not exceed connection.max_backoff_ms",
        ));
    }
    Ok(())
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
