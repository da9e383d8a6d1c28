//! Order notifier service
//!
//! Consumes order events from Kafka and pushes them to connected browsers.
//!
//! ```bash
//! KAFKA_BROKERS=localhost:9092 WS_PORT=8081 RUST_LOG=info cargo run --features kafka
//! ```

use anyhow::Context;
use order_notifier::config::NotifierConfig;
use order_notifier::ingest::KafkaEventSource;
use order_notifier::server::NotifierBuilder;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = NotifierConfig::load().context("invalid configuration")?;
    tracing::info!(
        listen = %config.server.bind_addr(),
        brokers = %config.kafka.bootstrap_servers(),
        topic = %config.kafka.topic,
        group_id = %config.kafka.group_id,
        identity = ?config.identity,
        "Starting order notifier"
    );

    let source = KafkaEventSource::connect(&config.kafka)
        .await
        .context("could not start Kafka consumer")?;

    NotifierBuilder::new(config)
        .serve(source)
        .await
        .context("notifier stopped with an error")?;

    Ok(())
}
