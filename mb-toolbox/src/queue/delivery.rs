//! Inbound deliveries and their acknowledgement capability.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use lapin::{acker::Acker, options::BasicAckOptions};

use crate::error::{AckError, AckFailure};
use crate::queue::types::DeliveryInfo;

/// Acknowledges one delivery back to the broker.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), AckFailure>;
}

#[async_trait]
impl Acknowledge for Acker {
    async fn ack(&self) -> Result<(), AckFailure> {
        Acker::ack(self, BasicAckOptions::default())
            .await
            .map_err(AckFailure::from)
    }
}

/// A raw delivery as handed to the consumer runtime.
pub struct IncomingDelivery {
    pub body: Vec<u8>,
    pub info: DeliveryInfo,
    pub acker: Box<dyn Acknowledge>,
}

impl IncomingDelivery {
    /// Wrap a lapin delivery received by the consumer tagged `consumer_tag`.
    pub fn from_lapin(delivery: lapin::message::Delivery, consumer_tag: &str) -> Self {
        Self {
            info: DeliveryInfo {
                exchange: delivery.exchange.as_str().to_string(),
                routing_key: delivery.routing_key.as_str().to_string(),
                consumer_tag: consumer_tag.to_string(),
                delivery_tag: delivery.delivery_tag,
            },
            body: delivery.data,
            acker: Box::new(delivery.acker),
        }
    }
}

/// The broker side of a decoded message: routing details plus an ack that
/// runs at most once, whoever calls it first.
pub struct DeliveryHandle {
    info: DeliveryInfo,
    acker: Box<dyn Acknowledge>,
    acked: AtomicBool,
}

impl DeliveryHandle {
    pub fn new(info: DeliveryInfo, acker: Box<dyn Acknowledge>) -> Self {
        Self {
            info,
            acker,
            acked: AtomicBool::new(false),
        }
    }

    pub fn info(&self) -> &DeliveryInfo {
        &self.info
    }

    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::SeqCst)
    }

    /// Acknowledge the delivery. Later calls are no-ops.
    pub async fn ack(&self) -> Result<(), AckError> {
        if self.acked.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.acker.ack().await.map_err(|source| {
            // Leave the handle ackable for a later attempt
            self.acked.store(false, Ordering::SeqCst);
            AckError {
                delivery_tag: self.info.delivery_tag,
                source,
            }
        })
    }
}

impl std::fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("info", &self.info)
            .field("acked", &self.is_acked())
            .finish()
    }
}
