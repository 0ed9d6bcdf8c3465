//! Stream source adapters for telemetry2store
//!
//! A [`StreamSource`] hands the runner one decoded event at a time from
//! either a Kafka topic subscription (queue-topic) or a Redis stream polled
//! with a cursor (cursor-log). Both adapters absorb transient connection
//! failures with exponential backoff and only give up once the configured
//! retry budget is spent.

use async_trait::async_trait;
use telemetry2store_config::{RuntimeConfig, SourceKind};
use telemetry2store_core::{DecodeError, TelemetryEvent};
use thiserror::Error;
use tracing::Span;

mod backoff;
#[cfg(feature = "kafka")]
mod kafka;
#[cfg(feature = "redis")]
mod redis_stream;

pub use backoff::{retry_connect, Backoff};
#[cfg(feature = "kafka")]
pub use kafka::KafkaSource;
#[cfg(feature = "redis")]
pub use redis_stream::RedisSource;

/// Outcome of one [`StreamSource::next`] call.
#[derive(Debug)]
pub enum Polled {
    /// A decoded event, in delivery order.
    Event(TelemetryEvent),
    /// A message that could not be decoded. The source has already moved
    /// past it.
    Malformed(DecodeError),
    /// A finite source has nothing more to deliver.
    EndOfStream,
}

/// Fatal source failures. Per-message problems surface as
/// [`Polled::Malformed`] instead.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{kind} source could not connect after {attempts} attempts: {reason}")]
    Connection {
        kind: SourceKind,
        attempts: u32,
        reason: String,
    },

    #[error("{kind} source endpoint is invalid: {reason}")]
    InvalidEndpoint { kind: SourceKind, reason: String },

    #[error("{kind} source was polled before open()")]
    NotOpen { kind: SourceKind },

    #[error("{kind} source is not available in this build (enable the '{feature}' feature)")]
    Unsupported {
        kind: SourceKind,
        feature: &'static str,
    },
}

/// A connection to an external stream of telemetry messages.
///
/// `next` is awaited inside `tokio::select!` by the runner, so it must be
/// cancel-safe: a cancelled call may not lose a message it already took off
/// the wire.
#[async_trait]
pub trait StreamSource: Send {
    fn kind(&self) -> SourceKind;

    /// Connect and subscribe. Retries transient failures internally.
    async fn open(&mut self) -> Result<(), SourceError>;

    /// Block until the next message is available.
    async fn next(&mut self) -> Result<Polled, SourceError>;

    /// Release the connection. Safe to call on a source that never opened.
    async fn close(&mut self) -> Result<(), SourceError>;
}

/// Build the adapter selected by `config.source`.
pub fn build_source(
    config: &RuntimeConfig,
    span: Span,
) -> Result<Box<dyn StreamSource>, SourceError> {
    match config.source {
        #[cfg(feature = "kafka")]
        SourceKind::QueueTopic => Ok(Box::new(KafkaSource::new(
            config.kafka.clone(),
            config.connection.clone(),
            span,
        ))),
        #[cfg(not(feature = "kafka"))]
        SourceKind::QueueTopic => {
            drop(span);
            Err(SourceError::Unsupported {
                kind: SourceKind::QueueTopic,
                feature: "kafka",
            })
        }
        #[cfg(feature = "redis")]
        SourceKind::CursorLog => Ok(Box::new(RedisSource::new(
            config.redis.clone(),
            config.connection.clone(),
            span,
        ))),
        #[cfg(not(feature = "redis"))]
        SourceKind::CursorLog => {
            drop(span);
            Err(SourceError::Unsupported {
                kind: SourceKind::CursorLog,
                feature: "redis",
            })
        }
    }
}

/// Decode a raw message payload; empty payloads are malformed.
pub fn decode_payload(payload: Option<&[u8]>) -> Polled {
    match payload {
        Some(bytes) => match TelemetryEvent::decode_json(bytes) {
            Ok(event) => Polled::Event(event),
            Err(e) => Polled::Malformed(e),
        },
        None => Polled::Malformed(DecodeError::EmptyPayload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_payload_classifies_messages() {
        match decode_payload(Some(br#"{"id":"a","timestamp":"2024-05-01T12:00:00Z"}"#)) {
            Polled::Event(event) => assert_eq!(event.id.as_deref(), Some("a")),
            other => panic!("expected event, got {:?}", other),
        }
        assert!(matches!(
            decode_payload(Some(b"not-json")),
            Polled::Malformed(DecodeError::InvalidJson(_))
        ));
        assert!(matches!(
            decode_payload(None),
            Polled::Malformed(DecodeError::EmptyPayload)
        ));
    }

    #[cfg(all(feature = "kafka", feature = "redis"))]
    #[test]
    fn build_source_follows_configured_kind() {
        let mut config = RuntimeConfig::default();
        config.kafka.bootstrap_servers = Some("localhost:9092".to_string());
        let source = build_source(&config, Span::none()).unwrap();
        assert_eq!(source.kind(), SourceKind::QueueTopic);

        config.source = SourceKind::CursorLog;
        config.redis.url = Some("redis://localhost:6379".to_string());
        let source = build_source(&config, Span::none()).unwrap();
        assert_eq!(source.kind(), SourceKind::CursorLog);
    }
}
