// Configuration document loading.
//
// A document is a partial view of `RuntimeConfig`: every field is optional
// and only the ones present override the defaults. Nested sections follow
// the `RuntimeConfig` layout; the flat top-level keys (`kafka_bootstrap`,
// `redis_url`, `duckdb_path`, `parquet_dir`, `batch_size`, ...) written by
// older deployments are still honored, with nested sections taking priority.

use crate::*;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Toml,
    Json,
}

impl DocumentFormat {
    /// `.json` files are JSON, everything else is TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DocumentFormat::Json,
            _ => DocumentFormat::Toml,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    pub source: Option<String>,

    #[serde(default)]
    pub kafka: Option<KafkaSection>,
    #[serde(default)]
    pub redis: Option<RedisSection>,
    #[serde(default)]
    pub storage: Option<StorageSection>,
    #[serde(default)]
    pub batch: Option<BatchSection>,
    #[serde(default)]
    pub connection: Option<ConnectionSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,

    // Flat keys
    pub kafka_bootstrap: Option<String>,
    pub kafka_topic: Option<String>,
    pub redis_url: Option<String>,
    pub redis_stream: Option<String>,
    pub duckdb_path: Option<PathBuf>,
    pub row_store_path: Option<PathBuf>,
    pub parquet_dir: Option<PathBuf>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KafkaSection {
    pub bootstrap_servers: Option<String>,
    pub topic: Option<String>,
    pub group_id: Option<String>,
    pub auto_offset_reset: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisSection {
    pub url: Option<String>,
    pub stream: Option<String>,
    pub block_ms: Option<u64>,
    pub count: Option<usize>,
    pub idle_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageSection {
    pub row_store_path: Option<PathBuf>,
    pub archive_dir: Option<PathBuf>,
    pub parquet_row_group_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchSection {
    pub size: Option<usize>,
    pub flush_max_retries: Option<u32>,
    pub flush_retry_backoff_ms: Option<u64>,
    pub failure_policy: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSection {
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub format: Option<String>,
}

impl ConfigDocument {
    /// Read and parse a document from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, DocumentFormat::from_path(path)).map_err(|reason| {
            ConfigError::Parse {
                path: path.to_path_buf(),
                reason,
            }
        })
    }

    /// Parse document text in the given format.
    pub fn parse(content: &str, format: DocumentFormat) -> std::result::Result<Self, String> {
        match format {
            DocumentFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            DocumentFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        }
    }

    /// Overlay the fields present in this document onto `config`.
    pub fn apply_to(self, config: &mut RuntimeConfig) -> Result<()> {
        if let Some(source) = &self.source {
            config.source = source.parse::<SourceKind>()?;
        }

        // Flat keys first so nested sections win.
        if let Some(v) = self.kafka_bootstrap {
            config.kafka.bootstrap_servers = Some(v);
        }
        if let Some(v) = self.kafka_topic {
            config.kafka.topic = v;
        }
        if let Some(v) = self.redis_url {
            config.redis.url = Some(v);
        }
        if let Some(v) = self.redis_stream {
            config.redis.stream = v;
        }
        if let Some(v) = self.row_store_path.or(self.duckdb_path) {
            config.storage.row_store_path = v;
        }
        if let Some(v) = self.parquet_dir {
            config.storage.archive_dir = v;
        }
        if let Some(v) = self.batch_size {
            config.batch.size = v;
        }

        if let Some(kafka) = self.kafka {
            if let Some(v) = kafka.bootstrap_servers {
                config.kafka.bootstrap_servers = Some(v);
            }
            if let Some(v) = kafka.topic {
                config.kafka.topic = v;
            }
            if let Some(v) = kafka.group_id {
                config.kafka.group_id = v;
            }
            if let Some(v) = kafka.auto_offset_reset {
                config.kafka.auto_offset_reset = v;
            }
        }

        if let Some(redis) = self.redis {
            if let Some(v) = redis.url {
                config.redis.url = Some(v);
            }
            if let Some(v) = redis.stream {
                config.redis.stream = v;
            }
            if let Some(v) = redis.block_ms {
                config.redis.block_ms = v;
            }
            if let Some(v) = redis.count {
                config.redis.count = v;
            }
            if let Some(v) = redis.idle_backoff_ms {
                config.redis.idle_backoff_ms = v;
            }
        }

        if let Some(storage) = self.storage {
            if let Some(v) = storage.row_store_path {
                config.storage.row_store_path = v;
            }
            if let Some(v) = storage.archive_dir {
                config.storage.archive_dir = v;
            }
            if let Some(v) = storage.parquet_row_group_size {
                config.storage.parquet_row_group_size = v;
            }
        }

        if let Some(batch) = self.batch {
            if let Some(v) = batch.size {
                config.batch.size = v;
            }
            if let Some(v) = batch.flush_max_retries {
                config.batch.flush_max_retries = v;
            }
            if let Some(v) = batch.flush_retry_backoff_ms {
                config.batch.flush_retry_backoff_ms = v;
            }
            if let Some(v) = batch.failure_policy {
                config.batch.failure_policy = v.parse::<FailurePolicy>()?;
            }
        }

        if let Some(connection) = self.connection {
            if let Some(v) = connection.max_retries {
                config.connection.max_retries = v;
            }
            if let Some(v) = connection.initial_backoff_ms {
                config.connection.initial_backoff_ms = v;
            }
            if let Some(v) = connection.max_backoff_ms {
                config.connection.max_backoff_ms = v;
            }
        }

        if let Some(logging) = self.logging {
            if let Some(v) = logging.level {
                config.logging.level = v;
            }
            if let Some(v) = logging.format {
                config.logging.format = v.parse::<LogFormat>()?;
            }
        }

        Ok(())
    }
}
