//! Cursor-log source backed by a Redis stream.
//!
//! Polls with `XREAD BLOCK <block_ms> COUNT <count> STREAMS <stream> <cursor>`.
//! The cursor starts at `$`, so only entries appended after the first read
//! are delivered, and it advances past every entry handed out, malformed or
//! not. The cursor lives in memory only; a restart tails the stream again.
//!
//! Failed reads share one backoff budget with the reconnects they trigger.
//! It is reset only by a successful read, so a server that accepts
//! connections but rejects every XREAD ends in `SourceError::Connection`.

use crate::backoff::{retry_connect, Backoff};
use crate::{Polled, SourceError, StreamSource};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::VecDeque;
use telemetry2store_config::{ConnectionConfig, RedisConfig, SourceKind};
use telemetry2store_core::{DecodeError, TelemetryEvent};
use tracing::{debug, info, warn, Instrument, Span};

const TAIL_CURSOR: &str = "$";

pub struct RedisSource {
    config: RedisConfig,
    connection: ConnectionConfig,
    client: Option<redis::Client>,
    conn: Option<MultiplexedConnection>,
    cursor: String,
    pending: VecDeque<Polled>,
    read_backoff: Backoff,
    span: Span,
}

impl RedisSource {
    pub fn new(config: RedisConfig, connection: ConnectionConfig, span: Span) -> Self {
        Self {
            read_backoff: Backoff::new(&connection),
            config,
            connection,
            client: None,
            conn: None,
            cursor: TAIL_CURSOR.to_string(),
            pending: VecDeque::new(),
            span,
        }
    }

    /// Id of the last entry handed out, or `$` before the first one.
    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    /// Queue every entry of an XREAD reply and advance the cursor past it.
    /// Returns the number of entries taken.
    fn absorb(&mut self, reply: StreamReadReply) -> usize {
        let mut taken = 0;
        for key in reply.keys {
            for entry in key.ids {
                self.pending.push_back(entry_to_polled(&entry));
                self.cursor = entry.id;
                taken += 1;
            }
        }
        taken
    }
}

async fn connect(
    client: &redis::Client,
    connection: &ConnectionConfig,
    span: &Span,
) -> Result<MultiplexedConnection, SourceError> {
    let mut backoff = Backoff::new(connection);
    retry_connect(SourceKind::CursorLog, &mut backoff, span, || {
        client.get_multiplexed_async_connection()
    })
    .instrument(span.clone())
    .await
}

/// Decode one stream entry. Every field value is itself JSON.
pub(crate) fn entry_to_polled(entry: &StreamId) -> Polled {
    let mut fields = Vec::with_capacity(entry.map.len());
    for (field, value) in &entry.map {
        match redis::from_redis_value::<Vec<u8>>(value) {
            Ok(bytes) => fields.push((field.clone(), bytes)),
            Err(e) => {
                return Polled::Malformed(DecodeError::InvalidField {
                    field: field.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
    match TelemetryEvent::decode_fields(fields) {
        Ok(event) => Polled::Event(event),
        Err(e) => Polled::Malformed(e),
    }
}

#[async_trait]
impl StreamSource for RedisSource {
    fn kind(&self) -> SourceKind {
        SourceKind::CursorLog
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let url = self.config.url.clone().unwrap_or_default();
        let client = redis::Client::open(url.as_str()).map_err(|e| SourceError::InvalidEndpoint {
            kind: SourceKind::CursorLog,
            reason: e.to_string(),
        })?;
        let conn = connect(&client, &self.connection, &self.span).await?;
        info!(parent: &self.span, stream = %self.config.stream, "Connected to stream");
        self.client = Some(client);
        self.conn = Some(conn);
        self.read_backoff.reset();
        Ok(())
    }

    async fn next(&mut self) -> Result<Polled, SourceError> {
        let options = StreamReadOptions::default()
            .block(self.config.block().as_millis() as usize)
            .count(self.config.count);

        loop {
            if let Some(polled) = self.pending.pop_front() {
                return Ok(polled);
            }

            if self.conn.is_none() {
                let client = self.client.as_ref().ok_or(SourceError::NotOpen {
                    kind: SourceKind::CursorLog,
                })?;
                let conn = connect(client, &self.connection, &self.span).await?;
                info!(parent: &self.span, cursor = %self.cursor, "Reconnected to stream");
                self.conn = Some(conn);
            }
            let Some(conn) = self.conn.as_mut() else {
                continue;
            };

            let reply: redis::RedisResult<Option<StreamReadReply>> = conn
                .xread_options(&[self.config.stream.as_str()], &[self.cursor.as_str()], &options)
                .await;

            if reply.is_ok() {
                self.read_backoff.reset();
            }
            match reply {
                Ok(Some(reply)) => {
                    let taken = self.absorb(reply);
                    debug!(parent: &self.span, entries = taken, cursor = %self.cursor, "Read entries");
                    if taken == 0 {
                        tokio::time::sleep(self.config.idle_backoff()).await;
                    }
                }
                Ok(None) => tokio::time::sleep(self.config.idle_backoff()).await,
                Err(e) => {
                    self.conn = None;
                    let Some(delay) = self.read_backoff.next_delay() else {
                        return Err(SourceError::Connection {
                            kind: SourceKind::CursorLog,
                            attempts: self.read_backoff.failures(),
                            reason: e.to_string(),
                        });
                    };
                    warn!(
                        parent: &self.span,
                        error = %e,
                        attempt = self.read_backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        "Stream read failed, reconnecting"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        if self.conn.take().is_some() {
            info!(parent: &self.span, stream = %self.config.stream, cursor = %self.cursor, "Closed stream connection");
        }
        self.client = None;
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::streams::StreamKey;
    use redis::Value;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn entry(id: &str, fields: &[(&str, &str)]) -> StreamId {
        let map: HashMap<String, Value> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), Value::BulkString(v.as_bytes().to_vec())))
            .collect();
        StreamId {
            id: id.to_string(),
            map,
        }
    }

    fn source() -> RedisSource {
        RedisSource::new(
            RedisConfig::default(),
            ConnectionConfig::default(),
            Span::none(),
        )
    }

    #[test]
    fn field_values_are_decoded_as_json() {
        let polled = entry_to_polled(&entry(
            "1700000000000-0",
            &[
                ("id", r#""evt-1""#),
                ("riskScore", "0.4"),
                ("timestamp", r#""2024-05-01T12:00:00Z""#),
                ("region", r#""eu-west-1""#),
            ],
        ));
        match polled {
            Polled::Event(event) => {
                assert_eq!(event.id.as_deref(), Some("evt-1"));
                assert_eq!(event.risk_score, Some(serde_json::Value::from(0.4)));
                assert_eq!(event.timestamp.as_deref(), Some("2024-05-01T12:00:00Z"));
                assert!(event.metadata.contains_key("region"));
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn non_json_field_value_is_malformed() {
        let polled = entry_to_polled(&entry("1-0", &[("id", "evt-1")]));
        assert!(matches!(
            polled,
            Polled::Malformed(DecodeError::InvalidField { ref field, .. }) if field == "id"
        ));
    }

    #[test]
    fn cursor_advances_past_every_entry() {
        let mut source = source();
        assert_eq!(source.cursor(), "$");

        let reply = StreamReadReply {
            keys: vec![StreamKey {
                key: "telemetry-events".to_string(),
                ids: vec![
                    entry("5-0", &[("id", r#""a""#)]),
                    entry("6-0", &[("id", "broken")]),
                    entry("7-1", &[("id", r#""c""#)]),
                ],
            }],
        };

        assert_eq!(source.absorb(reply), 3);
        assert_eq!(source.cursor(), "7-1");
        assert!(matches!(source.pending.pop_front(), Some(Polled::Event(_))));
        assert!(matches!(source.pending.pop_front(), Some(Polled::Malformed(_))));
        assert!(matches!(source.pending.pop_front(), Some(Polled::Event(_))));
    }

    #[tokio::test]
    async fn next_before_open_is_an_error() {
        let mut source = source();
        assert!(matches!(
            source.next().await,
            Err(SourceError::NotOpen { .. })
        ));
    }

    /// Length of the first complete RESP command array in `buf`.
    fn command_len(buf: &[u8]) -> Option<usize> {
        let (args, mut pos) = resp_header(buf, 0, b'*')?;
        for _ in 0..args {
            let (len, data) = resp_header(buf, pos, b'$')?;
            pos = data + len + 2;
            if buf.len() < pos {
                return None;
            }
        }
        Some(pos)
    }

    fn resp_header(buf: &[u8], start: usize, marker: u8) -> Option<(usize, usize)> {
        if *buf.get(start)? != marker {
            return None;
        }
        let end = start + buf[start..].windows(2).position(|w| w == b"\r\n")?;
        let value = std::str::from_utf8(&buf[start + 1..end]).ok()?.parse().ok()?;
        Some((value, end + 2))
    }

    /// A server that accepts connections and answers every command with an
    /// error. Returns its URL and the number of connections accepted.
    async fn rejecting_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    loop {
                        let n = match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        buf.extend_from_slice(&chunk[..n]);
                        while let Some(len) = command_len(&buf) {
                            buf.drain(..len);
                            let reply = b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n";
                            if socket.write_all(reply).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });

        (format!("redis://{}", addr), accepted)
    }

    #[tokio::test]
    async fn rejected_reads_exhaust_the_retry_budget() {
        let (url, accepted) = rejecting_server().await;
        let mut source = RedisSource::new(
            RedisConfig {
                url: Some(url),
                ..RedisConfig::default()
            },
            ConnectionConfig {
                max_retries: 2,
                initial_backoff_ms: 10,
                max_backoff_ms: 20,
            },
            Span::none(),
        );

        source.open().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(10), source.next())
            .await
            .expect("next() kept retrying past its budget");

        match result {
            Err(SourceError::Connection { attempts, reason, .. }) => {
                assert_eq!(attempts, 3);
                assert!(!reason.is_empty());
            }
            other => panic!("expected connection error, got {:?}", other),
        }
        // The initial connection plus one reconnect per retry.
        assert!(accepted.load(Ordering::SeqCst) <= 3);
        assert!(source.close().await.is_ok());
    }

    #[tokio::test]
    async fn open_rejects_malformed_url() {
        let mut source = RedisSource::new(
            RedisConfig {
                url: Some("not a url".to_string()),
                ..RedisConfig::default()
            },
            ConnectionConfig::default(),
            Span::none(),
        );
        assert!(matches!(
            source.open().await,
            Err(SourceError::InvalidEndpoint { .. })
        ));
    }
}
