use super::{ConfigError, FailurePolicy, LogFormat, Result, RuntimeConfig, SourceKind};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Abstraction over environment-variable lookups so tests can supply their
/// own overrides without mutating the process environment.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads from `std::env`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl EnvSource for HashMap<&str, &str> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).map(|v| v.to_string())
    }
}

/// Apply environment-variable overrides to the runtime config.
///
/// Empty values are treated as unset, except `INGEST_SOURCE`: a blank
/// source is an unknown source.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    if let Some(source) = env.get("INGEST_SOURCE") {
        config.source = source.parse::<SourceKind>()?;
    }

    // Queue-topic
    if let Some(bootstrap) = get_env_string(env, "KAFKA_BOOTSTRAP_SERVERS") {
        config.kafka.bootstrap_servers = Some(bootstrap);
    }
    if let Some(topic) = get_env_string(env, "KAFKA_TOPIC") {
        config.kafka.topic = topic;
    }
    if let Some(group_id) = get_env_string(env, "KAFKA_GROUP_ID") {
        config.kafka.group_id = group_id;
    }

    // Cursor-log
    if let Some(url) = get_env_string(env, "REDIS_URL") {
        config.redis.url = Some(url);
    }
    if let Some(stream) = get_env_string(env, "REDIS_STREAM") {
        config.redis.stream = stream;
    }

    // Storage; DUCKDB_PATH is accepted for deployments configured before the
    // row store moved to SQLite.
    if let Some(path) =
        get_env_string(env, "ROW_STORE_PATH").or_else(|| get_env_string(env, "DUCKDB_PATH"))
    {
        config.storage.row_store_path = PathBuf::from(path);
    }
    if let Some(dir) = get_env_string(env, "PARQUET_DIR") {
        config.storage.archive_dir = PathBuf::from(dir);
    }

    // Batching
    if let Some(size) = get_env_parsed::<usize, _>(env, "BATCH_SIZE")? {
        config.batch.size = size;
    }
    if let Some(retries) = get_env_parsed::<u32, _>(env, "FLUSH_MAX_RETRIES")? {
        config.batch.flush_max_retries = retries;
    }
    if let Some(policy) = get_env_string(env, "FAILURE_POLICY") {
        config.batch.failure_policy = policy.parse::<FailurePolicy>()?;
    }

    // Connection
    if let Some(retries) = get_env_parsed::<u32, _>(env, "CONNECT_MAX_RETRIES")? {
        config.connection.max_retries = retries;
    }

    // Logging
    if let Some(level) = get_env_string(env, "INGEST_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = get_env_string(env, "INGEST_LOG_FORMAT") {
        config.logging.format = format.parse::<LogFormat>()?;
    }

    Ok(())
}

fn get_env_string<E: EnvSource>(env: &E, key: &str) -> Option<String> {
    env.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn get_env_parsed<T, E>(env: &E, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    E: EnvSource,
{
    match get_env_string(env, key) {
        Some(val) => val
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("'{}': {}", val, e),
            }),
        None => Ok(None),
    }
}
