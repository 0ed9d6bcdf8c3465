//! Queue-topic source backed by an rdkafka `StreamConsumer`.
//!
//! Offsets are auto-committed by the consumer group, so delivery is
//! at-least-once from the broker's point of view.

use crate::backoff::{retry_connect, Backoff};
use crate::{decode_payload, Polled, SourceError, StreamSource};
use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use telemetry2store_config::{ConnectionConfig, KafkaConfig, SourceKind};
use tracing::{debug, info, warn, Instrument, Span};

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

pub struct KafkaSource {
    config: KafkaConfig,
    connection: ConnectionConfig,
    consumer: Option<Arc<StreamConsumer>>,
    span: Span,
}

impl KafkaSource {
    pub fn new(config: KafkaConfig, connection: ConnectionConfig, span: Span) -> Self {
        Self {
            config,
            connection,
            consumer: None,
            span,
        }
    }
}

async fn connect(
    config: &KafkaConfig,
    connection: &ConnectionConfig,
    span: &Span,
) -> Result<Arc<StreamConsumer>, SourceError> {
    let client = client_config(config)?;
    let topic = config.topic.clone();
    let mut backoff = Backoff::new(connection);

    retry_connect(SourceKind::QueueTopic, &mut backoff, span, || {
        let client = client.clone();
        let topic = topic.clone();
        async move {
            let consumer: StreamConsumer = client.create().map_err(|e| e.to_string())?;
            let consumer = Arc::new(consumer);

            // Creating the consumer does not touch the network; a metadata
            // round-trip proves the broker is reachable.
            let client_handle = Arc::clone(&consumer);
            let metadata_topic = topic.clone();
            tokio::task::spawn_blocking(move || {
                client_handle
                    .fetch_metadata(Some(&metadata_topic), METADATA_TIMEOUT)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| e.to_string())??;

            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|e| e.to_string())?;
            Ok::<_, String>(consumer)
        }
    })
    .await
}

/// librdkafka settings for the consumer group.
pub(crate) fn client_config(config: &KafkaConfig) -> Result<ClientConfig, SourceError> {
    let bootstrap = config
        .bootstrap_servers
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| SourceError::InvalidEndpoint {
            kind: SourceKind::QueueTopic,
            reason: "no bootstrap servers configured".to_string(),
        })?;

    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", bootstrap)
        .set("group.id", &config.group_id)
        .set("auto.offset.reset", &config.auto_offset_reset)
        .set("enable.auto.commit", "true")
        .set("enable.partition.eof", "false");
    Ok(client)
}

#[async_trait]
impl StreamSource for KafkaSource {
    fn kind(&self) -> SourceKind {
        SourceKind::QueueTopic
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let consumer = connect(&self.config, &self.connection, &self.span)
            .instrument(self.span.clone())
            .await?;
        info!(
            parent: &self.span,
            topic = %self.config.topic,
            group_id = %self.config.group_id,
            "Subscribed to topic"
        );
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn next(&mut self) -> Result<Polled, SourceError> {
        let consumer = self
            .consumer
            .as_ref()
            .map(Arc::clone)
            .ok_or(SourceError::NotOpen {
                kind: SourceKind::QueueTopic,
            })?;
        let mut backoff = Backoff::new(&self.connection);

        loop {
            match consumer.recv().await {
                Ok(msg) => {
                    debug!(
                        parent: &self.span,
                        partition = msg.partition(),
                        offset = msg.offset(),
                        "Received message"
                    );
                    return Ok(decode_payload(msg.payload()));
                }
                Err(e) => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            parent: &self.span,
                            error = %e,
                            attempt = backoff.failures(),
                            "Kafka consumer error"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(SourceError::Connection {
                            kind: SourceKind::QueueTopic,
                            attempts: backoff.failures(),
                            reason: e.to_string(),
                        })
                    }
                },
            }
        }
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            info!(parent: &self.span, topic = %self.config.topic, "Unsubscribed from topic");
        }
        Ok(())
    }
}
