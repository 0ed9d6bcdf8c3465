// telemetry2store-config - Configuration resolution for the ingest worker
//
// Supports configuration from multiple sources:
// 1. CLI flags (highest priority, applied by the binary)
// 2. Environment variables
// 3. Configuration document (TOML, or JSON for `.json` paths)
// 4. Built-in defaults (lowest priority)

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{apply_env_overrides, EnvSource, StdEnvSource};
pub use sources::{ConfigDocument, DocumentFormat};

/// Configuration failures. Always fatal: the process does not start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown source '{value}': expected 'queue-topic' (kafka) or 'cursor-log' (redis)")]
    UnknownSource { value: String },

    #[error("{kind} source requires {parameter} (set {hint})")]
    MissingParameter {
        kind: SourceKind,
        parameter: &'static str,
        hint: &'static str,
    },

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub source: SourceKind,
    pub kafka: KafkaConfig,
    pub redis: RedisConfig,
    pub storage: StorageConfig,
    pub batch: BatchConfig,
    pub connection: ConnectionConfig,
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::QueueTopic,
            kafka: KafkaConfig::default(),
            redis: RedisConfig::default(),
            storage: StorageConfig::default(),
            batch: BatchConfig::default(),
            connection: ConnectionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// The two stream source adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Broker topic subscription (Kafka).
    QueueTopic,
    /// Cursor-driven log polling (Redis Streams).
    CursorLog,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::QueueTopic => write!(f, "queue-topic"),
            SourceKind::CursorLog => write!(f, "cursor-log"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "queue-topic" | "queue_topic" | "kafka" => Ok(SourceKind::QueueTopic),
            "cursor-log" | "cursor_log" | "redis" => Ok(SourceKind::CursorLog),
            _ => Err(ConfigError::UnknownSource {
                value: s.to_string(),
            }),
        }
    }
}

/// Queue-topic (Kafka) connection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct KafkaConfig {
    pub bootstrap_servers: Option<String>,
    pub topic: String,
    pub group_id: String,
    pub auto_offset_reset: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: None,
            topic: "telemetry.events".to_string(),
            group_id: "telemetry2store".to_string(),
            auto_offset_reset: "latest".to_string(),
        }
    }
}

/// Cursor-log (Redis Streams) connection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub stream: String,
    /// Server-side blocking time per poll
    pub block_ms: u64,
    /// Maximum entries returned per poll
    pub count: usize,
    /// Pause after an empty poll
    pub idle_backoff_ms: u64,
}

impl RedisConfig {
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            stream: "telemetry-events".to_string(),
            block_ms: 5_000,
            count: 100,
            idle_backoff_ms: 100,
        }
    }
}

/// Row store and archive locations
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub row_store_path: PathBuf,
    pub archive_dir: PathBuf,
    pub parquet_row_group_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            row_store_path: PathBuf::from("data/feature_store.db"),
            archive_dir: PathBuf::from("data/features"),
            parquet_row_group_size: 32 * 1024,
        }
    }
}

/// How per-record failures affect the row-store write of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Drop the failing record, persist the rest.
    #[default]
    DropRecord,
    /// Skip the row-store write for any batch containing a failure.
    /// The archive file is still written.
    AbortBatch,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::DropRecord => write!(f, "drop-record"),
            FailurePolicy::AbortBatch => write!(f, "abort-batch"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "drop-record" | "drop_record" | "drop" => Ok(FailurePolicy::DropRecord),
            "abort-batch" | "abort_batch" | "abort" | "strict" => Ok(FailurePolicy::AbortBatch),
            _ => Err(ConfigError::InvalidValue {
                key: "batch.failure_policy".to_string(),
                reason: format!("'{}' is not one of drop-record, abort-batch", s),
            }),
        }
    }
}

/// Batch configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub size: usize,
    pub flush_max_retries: u32,
    pub flush_retry_backoff_ms: u64,
    pub failure_policy: FailurePolicy,
}

impl BatchConfig {
    pub fn flush_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.flush_retry_backoff_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 512,
            flush_max_retries: 3,
            flush_retry_backoff_ms: 500,
            failure_policy: FailurePolicy::DropRecord,
        }
    }
}

/// Reconnection budget for source adapters
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 250,
            max_backoff_ms: 10_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                key: "logging.format".to_string(),
                reason: format!("'{}' is not one of text, json", s),
            }),
        }
    }
}

impl RuntimeConfig {
    /// Resolve from the process environment only.
    pub fn from_env() -> Result<Self> {
        Self::resolve(None, &StdEnvSource)
    }

    /// Resolve from an optional configuration document plus the process
    /// environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::resolve(path, &StdEnvSource)
    }

    /// Like [`RuntimeConfig::load`], with a final override layer (CLI flags)
    /// applied before validation.
    pub fn load_with<F>(path: Option<&Path>, overrides: F) -> Result<Self>
    where
        F: FnOnce(&mut RuntimeConfig),
    {
        Self::resolve_with(path, &StdEnvSource, overrides)
    }

    /// Resolve against an explicit environment source (useful for testing).
    pub fn resolve<E: EnvSource>(path: Option<&Path>, env: &E) -> Result<Self> {
        Self::resolve_with(path, env, |_| {})
    }

    pub fn resolve_with<E, F>(path: Option<&Path>, env: &E, overrides: F) -> Result<Self>
    where
        E: EnvSource,
        F: FnOnce(&mut RuntimeConfig),
    {
        let mut config = RuntimeConfig::default();
        if let Some(path) = path {
            let document = ConfigDocument::from_path(path)?;
            document.apply_to(&mut config)?;
        }
        apply_env_overrides(&mut config, env)?;
        overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Build from a structured configuration document only (no environment).
    pub fn from_document(document: ConfigDocument) -> Result<Self> {
        let mut config = RuntimeConfig::default();
        document.apply_to(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_from_str() {
        assert_eq!(
            "queue-topic".parse::<SourceKind>().unwrap(),
            SourceKind::QueueTopic
        );
        assert_eq!("kafka".parse::<SourceKind>().unwrap(), SourceKind::QueueTopic);
        assert_eq!(
            "cursor-log".parse::<SourceKind>().unwrap(),
            SourceKind::CursorLog
        );
        assert_eq!("Redis".parse::<SourceKind>().unwrap(), SourceKind::CursorLog);
        assert!(matches!(
            "unknown".parse::<SourceKind>(),
            Err(ConfigError::UnknownSource { value }) if value == "unknown"
        ));
    }

    #[test]
    fn test_default_configs() {
        let config = RuntimeConfig::default();
        assert_eq!(config.source, SourceKind::QueueTopic);
        assert_eq!(config.batch.size, 512);
        assert_eq!(config.batch.failure_policy, FailurePolicy::DropRecord);
        assert_eq!(config.kafka.topic, "telemetry.events");
        assert_eq!(config.redis.stream, "telemetry-events");
        assert_eq!(config.redis.block(), Duration::from_secs(5));
        assert_eq!(config.redis.count, 100);
        assert_eq!(config.redis.idle_backoff(), Duration::from_millis(100));
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_overrides_apply_before_validation() {
        let env: std::collections::HashMap<&str, &str> =
            [("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"), ("BATCH_SIZE", "0")]
                .into_iter()
                .collect();
        assert!(RuntimeConfig::resolve(None, &env).is_err());

        let config = RuntimeConfig::resolve_with(None, &env, |c| c.batch.size = 8).unwrap();
        assert_eq!(config.batch.size, 8);
    }

    #[test]
    fn test_failure_policy_from_str() {
        assert_eq!(
            "abort-batch".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::AbortBatch
        );
        assert_eq!(
            "drop".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::DropRecord
        );
        assert!("sometimes".parse::<FailurePolicy>().is_err());
    }
}
