//! MB Relay - throttled consumer that republishes messages under a new routing key.
//!
//! Reads from the configured queue, drops messages missing the required
//! field, and forwards the rest as fresh envelopes on the application exchange.

mod relay;

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mb_toolbox::queue::Topology;
use mb_toolbox::{consumer, Config, Producer, Publisher};

use relay::RelayHandler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("relay_starting");

    // Load configuration from environment
    let config = Config::from_env();
    tracing::info!(
        exchange = %config.exchange.name,
        queue = %config.queue.name,
        routing_key = %config.relay_routing_key,
        max_message_rate = config.max_message_rate,
        management_configured = config.management.is_some(),
        "config_loaded"
    );

    if config.relay_routing_key.is_empty() {
        bail!("RELAY_ROUTING_KEY must be set");
    }

    let publisher = Publisher::new(config.amqp_url.clone(), Topology::exchange_only(&config));
    let producer = Producer::new(Arc::new(publisher.clone()));

    let (mut runtime, dead_letter_publisher) =
        consumer::runtime_from_config(&config, RelayHandler::new(&config, producer))?;

    let result = consumer::run(&config, &mut runtime).await;

    publisher.close().await;
    dead_letter_publisher.close().await;

    result
}
