//! MB Produce - publishes one envelope per JSON line read from stdin.
//!
//! Blank lines are ignored. The first line that fails to parse or publish
//! ends the run with a non-zero exit status.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mb_toolbox::queue::Topology;
use mb_toolbox::{Config, DeliveryMode, Producer, Publisher};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true).with_writer(std::io::stderr))
        .init();

    let config = Config::from_env();

    if config.producer_routing_key.is_empty() {
        bail!("PRODUCER_ROUTING_KEY must be set");
    }

    let mode = DeliveryMode::from_persistent(config.producer_persistent);
    let publisher = Publisher::new(config.amqp_url.clone(), Topology::exchange_only(&config));
    let producer = Producer::new(Arc::new(publisher.clone()));

    tracing::info!(
        exchange = %config.exchange.name,
        routing_key = %config.producer_routing_key,
        persistent = config.producer_persistent,
        "producer_starting"
    );

    let result = produce_lines(&producer, &config.producer_routing_key, mode).await;

    publisher.close().await;

    let published = result?;
    tracing::info!(published, "producer_finished");

    Ok(())
}

async fn produce_lines(producer: &Producer, routing_key: &str, mode: DeliveryMode) -> Result<u64> {
    let mut lines = BufReader::new(stdin()).lines();
    let mut line_number = 0u64;
    let mut published = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let data: Value = serde_json::from_str(line)
            .with_context(|| format!("Line {} is not valid JSON", line_number))?;

        producer
            .publish(&producer.build_envelope(data), routing_key, mode)
            .await
            .with_context(|| format!("Failed to publish line {}", line_number))?;

        published += 1;
    }

    Ok(published)
}
