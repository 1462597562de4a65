//! Wire-level types shared by publishers and consumers.

use serde::{Deserialize, Serialize};

/// Routing key every dead letter is published with.
pub const DEAD_LETTER_ROUTING_KEY: &str = "deadLetter";

/// AMQP delivery mode of a published message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Kept in memory only; roughly three times faster
    #[default]
    NonPersistent,
    /// Written to disk by the broker
    Persistent,
}

impl DeliveryMode {
    /// The numeric value carried in the AMQP basic properties.
    pub fn as_u8(self) -> u8 {
        match self {
            DeliveryMode::NonPersistent => 1,
            DeliveryMode::Persistent => 2,
        }
    }

    pub fn from_persistent(persistent: bool) -> Self {
        if persistent {
            DeliveryMode::Persistent
        } else {
            DeliveryMode::NonPersistent
        }
    }
}

/// Broker routing details of a delivery, as recorded in dead letters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryInfo {
    pub exchange: String,
    pub routing_key: String,
    pub consumer_tag: String,
    #[serde(skip)]
    pub delivery_tag: u64,
}

/// Point-in-time depth of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub ready: u64,
    pub unacked: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_mode_values() {
        assert_eq!(DeliveryMode::default().as_u8(), 1);
        assert_eq!(DeliveryMode::from_persistent(true).as_u8(), 2);
        assert_eq!(DeliveryMode::from_persistent(false), DeliveryMode::NonPersistent);
    }

    #[test]
    fn test_delivery_info_serialization_omits_tag() {
        let info = DeliveryInfo {
            exchange: "transactionalExchange".to_string(),
            routing_key: "campaign.signup.transactional".to_string(),
            consumer_tag: "mbc-transactional".to_string(),
            delivery_tag: 42,
        };

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["routing_key"], "campaign.signup.transactional");
        assert!(json.get("delivery_tag").is_none());
    }
}
