//! RabbitMQ consumer loop using lapin.
//!
//! This module connects to RabbitMQ, declares the consumer's topology, and
//! feeds deliveries to a [`ConsumerRuntime`] one at a time until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties, Consumer,
};
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::consumer::handler::MessageHandler;
use crate::consumer::runtime::{ConsumerRuntime, Outcome};
use crate::dead_letter::DeadLetterSink;
use crate::management::{ManagementClient, QueueStatusProbe};
use crate::queue::{IncomingDelivery, Publisher, Topology};

/// Management API request timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a runtime wired from `config`: a dead-letter publisher on its own
/// connection, the management probe when configured, and the process deadline.
///
/// Returns the dead-letter publisher too so the caller can close it on shutdown.
pub fn runtime_from_config<H: MessageHandler>(
    config: &Config,
    handler: H,
) -> Result<(ConsumerRuntime<H>, Publisher)> {
    let dead_letter_publisher = Publisher::new(
        config.dead_letter_amqp_url.clone(),
        Topology::dead_letter(config),
    );

    let mut runtime = ConsumerRuntime::new(
        handler,
        DeadLetterSink::new(Arc::new(dead_letter_publisher.clone())),
    )
    .with_process_timeout(config.process_timeout);

    if let Some(settings) = &config.management {
        let probe: Arc<dyn QueueStatusProbe> = Arc::new(
            ManagementClient::new(settings, PROBE_TIMEOUT)
                .context("Failed to create management client")?,
        );
        runtime = runtime.with_probe(probe);
        info!(host = %settings.host, vhost = %settings.vhost, "management_probe_configured");
    }

    Ok((runtime, dead_letter_publisher))
}

/// Run the consumer until SIGINT/SIGTERM or until the broker closes the consumer.
///
/// Connection and topology failures end the run with an error. A delivery
/// that overruns its processing deadline tears the channel down and the loop
/// reconnects.
pub async fn run<H: MessageHandler>(config: &Config, runtime: &mut ConsumerRuntime<H>) -> Result<()> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let (conn, channel, mut consumer) = connect(config).await?;

        info!(queue = %config.queue.name, "consumer_ready");

        let reset = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("consumer_stopping");
                    break false;
                }
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            info!(
                                queue = %config.queue.name,
                                delivery_tag = delivery.delivery_tag,
                                body_length = delivery.data.len(),
                                "rabbitmq_message_received"
                            );

                            let incoming = IncomingDelivery::from_lapin(delivery, &config.consumer_tag);
                            if runtime.on_delivery(incoming).await == Outcome::TimedOut {
                                break true;
                            }
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "rabbitmq_delivery_error");
                        }
                        None => {
                            warn!("rabbitmq_consumer_closed");
                            break false;
                        }
                    }
                }
            }
        };

        if let Err(e) = channel.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_channel_close_error");
        }
        if let Err(e) = conn.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_connection_close_error");
        }

        if !reset {
            break;
        }

        warn!(queue = %config.queue.name, "consumer_channel_reset");
    }

    info!("consumer_shutdown_complete");
    Ok(())
}

/// Connect, declare topology and start consuming.
async fn connect(config: &Config) -> Result<(Connection, Channel, Consumer)> {
    info!(url_length = config.amqp_url.len(), "rabbitmq_connecting");

    let conn = Connection::connect(&config.amqp_url, ConnectionProperties::default())
        .await
        .context("Failed to connect to RabbitMQ")?;

    info!("rabbitmq_connected");

    let channel = conn.create_channel().await.context("Failed to create channel")?;

    info!("rabbitmq_channel_created");

    // One unacknowledged delivery at a time by default
    channel
        .basic_qos(config.prefetch, BasicQosOptions::default())
        .await
        .context("Failed to set QoS")?;

    info!(prefetch_count = config.prefetch, "rabbitmq_qos_set");

    Topology::application(config)
        .declare(&channel)
        .await
        .context("Failed to declare topology")?;

    let consumer = channel
        .basic_consume(
            &config.queue.name,
            &config.consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to start consumer")?;

    info!(
        queue = %config.queue.name,
        consumer_tag = %config.consumer_tag,
        "rabbitmq_consumer_started"
    );

    Ok((conn, channel, consumer))
}

/// Resolves when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
