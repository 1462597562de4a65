//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - Wire-level types (delivery modes, routing details, queue depth)
//! - Topology declaration for exchanges, queues and bindings
//! - The publisher seam and its lapin implementation
//! - Inbound delivery handles with an idempotent ack
//!
//! ## Flow
//!
//! ```text
//! Producer → exchange → queue → Consumer ─(failure)→ deadLetter exchange → dead-letter queue
//! ```

pub mod delivery;
pub mod publisher;
pub mod topology;
pub mod types;

pub use delivery::{Acknowledge, DeliveryHandle, IncomingDelivery};
pub use publisher::{BrokerPublisher, Publisher};
pub use topology::Topology;
pub use types::{DeliveryInfo, DeliveryMode, QueueDepth, DEAD_LETTER_ROUTING_KEY};
