//! Async RabbitMQ publisher.
//!
//! This module provides the [`BrokerPublisher`] seam the producer runtime and
//! the dead-letter sink publish through, and a lapin-backed implementation
//! that keeps one connection and channel open, reconnecting on failure.

use std::sync::Arc;

use async_trait::async_trait;
use lapin::{
    options::BasicPublishOptions, BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::PublishError;
use crate::queue::topology::Topology;
use crate::queue::types::DeliveryMode;

/// Publishes raw bodies to a fixed exchange.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    /// Publish `body` with the given routing key and delivery mode.
    async fn publish(
        &self,
        body: &[u8],
        routing_key: &str,
        mode: DeliveryMode,
    ) -> Result<(), PublishError>;
}

/// Async RabbitMQ publisher with connection management.
///
/// The publisher maintains a persistent connection and channel to RabbitMQ,
/// automatically reconnecting on failure. Clones share the connection.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    url: String,
    topology: Topology,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl Publisher {
    /// Create a new publisher for the exchange described by `topology`.
    pub fn new(url: String, topology: Topology) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                url,
                topology,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Name of the exchange this publisher targets.
    pub fn exchange(&self) -> &str {
        &self.inner.topology.exchange.name
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel, PublishError> {
        // Check if we have a valid channel
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        // Need to reconnect
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!(exchange = %self.exchange(), "rabbitmq_publisher_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .map_err(PublishError::Connect)?;

        info!(exchange = %self.exchange(), "rabbitmq_publisher_connected");

        let ch = conn.create_channel().await.map_err(PublishError::Channel)?;

        self.inner
            .topology
            .declare(&ch)
            .await
            .map_err(PublishError::Declare)?;

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!(exchange = %self.exchange(), "rabbitmq_publisher_closed");
    }
}

#[async_trait]
impl BrokerPublisher for Publisher {
    async fn publish(
        &self,
        body: &[u8],
        routing_key: &str,
        mode: DeliveryMode,
    ) -> Result<(), PublishError> {
        let channel = self.ensure_connected().await?;

        channel
            .basic_publish(
                self.exchange(),
                routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(mode.as_u8())
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|source| PublishError::Publish {
                exchange: self.exchange().to_string(),
                source,
            })?
            .await
            .map_err(PublishError::Confirm)?;

        info!(
            exchange = %self.exchange(),
            routing_key = routing_key,
            delivery_mode = mode.as_u8(),
            body_length = body.len(),
            "rabbitmq_message_published"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeSettings;
    use lapin::ExchangeKind;

    #[test]
    fn test_publisher_creation() {
        let topology = Topology {
            exchange: ExchangeSettings {
                name: "transactionalExchange".to_string(),
                kind: ExchangeKind::Topic,
                durable: true,
            },
            queue: None,
        };
        let publisher = Publisher::new("amqp://localhost:5672".to_string(), topology);

        assert_eq!(publisher.exchange(), "transactionalExchange");
        let clone = publisher.clone();
        assert_eq!(Arc::strong_count(&clone.inner), 2);
    }
}
