//! Kafka-backed [`EventSource`]
//!
//! The notifier joins a consumer group on the order topic. Offsets are
//! auto-committed, and committed synchronously once more on close so a
//! restart resumes where this instance stopped.

use super::source::{EventSource, StreamRecord};
use crate::config::KafkaConfig;
use crate::core::error::SourceError;
use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::fmt::Display;
use std::time::Duration;

const STARTUP_MAX_RETRIES: u32 = 5;

pub struct KafkaEventSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaEventSource {
    /// Create the consumer and subscribe, retrying with exponential backoff
    pub async fn connect(config: &KafkaConfig) -> Result<Self, SourceError> {
        let consumer: StreamConsumer =
            with_retries("create Kafka consumer", || client_config(config).create()).await?;

        with_retries("subscribe to Kafka topic", || {
            consumer.subscribe(&[config.topic.as_str()])
        })
        .await?;

        tracing::info!(
            brokers = %config.bootstrap_servers(),
            group_id = %config.group_id,
            topic = %config.topic,
            auto_offset_reset = %config.auto_offset_reset,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }
}

fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", config.bootstrap_servers())
        .set("client.id", &config.client_id)
        .set("group.id", &config.group_id)
        .set("enable.auto.commit", "true")
        .set("auto.offset.reset", &config.auto_offset_reset)
        .set("session.timeout.ms", "10000")
        .set("reconnect.backoff.ms", "100")
        .set("reconnect.backoff.max.ms", "10000");
    client
}

async fn with_retries<T, E, F>(what: &str, mut op: F) -> Result<T, SourceError>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt: u32 = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= STARTUP_MAX_RETRIES {
                    return Err(SourceError::Startup(format!(
                        "failed to {} after {} attempts: {}",
                        what, attempt, e
                    )));
                }
                let backoff = Duration::from_millis(1000 * (1 << attempt));
                tracing::warn!(
                    attempt,
                    max_attempts = STARTUP_MAX_RETRIES,
                    error = %e,
                    retry_in_ms = backoff.as_millis() as u64,
                    "Failed to {}",
                    what
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn next_record(&mut self) -> Option<Result<StreamRecord, SourceError>> {
        let record = match self.consumer.recv().await {
            Ok(message) => Ok(StreamRecord {
                payload: message.payload().map(<[u8]>::to_vec),
                partition: message.partition(),
                offset: message.offset(),
            }),
            Err(e) => Err(SourceError::Transport(e.to_string())),
        };
        Some(record)
    }

    async fn close(&mut self) {
        if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Sync) {
            // Nothing consumed since the last auto-commit
            tracing::debug!(error = %e, "Final offset commit skipped");
        }
        self.consumer.unsubscribe();
        tracing::info!(topic = %self.topic, "Kafka consumer closed");
    }
}
