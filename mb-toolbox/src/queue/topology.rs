//! Exchange and queue declarations.
//!
//! Declarations are idempotent, so both publishers and consumers declare the
//! topology they rely on every time they open a channel.

use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, ExchangeKind,
};
use tracing::info;

use crate::config::{Config, ExchangeSettings, QueueSettings};
use crate::queue::types::DEAD_LETTER_ROUTING_KEY;

/// An exchange plus the queue bound to it, if any.
#[derive(Debug, Clone)]
pub struct Topology {
    pub exchange: ExchangeSettings,
    pub queue: Option<QueueSettings>,
}

impl Topology {
    /// The application exchange and the queue the consumer reads from.
    pub fn application(config: &Config) -> Self {
        Self {
            exchange: config.exchange.clone(),
            queue: Some(config.queue.clone()),
        }
    }

    /// The application exchange alone, for producers.
    pub fn exchange_only(config: &Config) -> Self {
        Self {
            exchange: config.exchange.clone(),
            queue: None,
        }
    }

    /// The dead-letter exchange and its queue, bound with the `deadLetter` key.
    pub fn dead_letter(config: &Config) -> Self {
        Self {
            exchange: ExchangeSettings {
                name: config.dead_letter_exchange.clone(),
                kind: ExchangeKind::Direct,
                durable: true,
            },
            queue: Some(QueueSettings {
                name: config.dead_letter_queue.clone(),
                durable: true,
                binding_keys: vec![DEAD_LETTER_ROUTING_KEY.to_string()],
            }),
        }
    }

    /// Declare the exchange, then the queue and its bindings.
    pub async fn declare(&self, channel: &Channel) -> Result<(), lapin::Error> {
        // The default exchange is pre-declared and cannot be redeclared
        if !self.exchange.name.is_empty() {
            channel
                .exchange_declare(
                    &self.exchange.name,
                    self.exchange.kind.clone(),
                    ExchangeDeclareOptions {
                        durable: self.exchange.durable,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;

            info!(exchange = %self.exchange.name, "rabbitmq_exchange_declared");
        }

        let Some(queue) = &self.queue else {
            return Ok(());
        };

        channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(queue = %queue.name, "rabbitmq_queue_declared");

        if self.exchange.name.is_empty() {
            return Ok(());
        }

        // A queue with no explicit keys is bound with its own name
        let keys: Vec<&str> = if queue.binding_keys.is_empty() {
            vec![queue.name.as_str()]
        } else {
            queue.binding_keys.iter().map(String::as_str).collect()
        };

        for key in keys {
            channel
                .queue_bind(
                    &queue.name,
                    &self.exchange.name,
                    key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;

            info!(
                queue = %queue.name,
                exchange = %self.exchange.name,
                binding_key = key,
                "rabbitmq_queue_bound"
            );
        }

        Ok(())
    }
}
