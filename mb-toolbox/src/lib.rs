//! MB Toolbox - building blocks for Message Broker consumers and producers.
//!
//! This library provides the shared runtime for small RabbitMQ applications:
//! - `consumer`: hook-driven consumer runtime with throttling and dead-lettering
//! - `producer`: message envelopes and fail-fast publishing
//! - `envelope`: legacy/JSON payload detection and decoding
//!
//! ## Architecture
//!
//! ```text
//! Producer → exchange → queue → ConsumerRuntime → MessageHandler
//!                                      └─(failure)→ DeadLetterSink → deadLetter queue
//! ```

pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod envelope;
pub mod error;
pub mod management;
pub mod producer;
pub mod queue;
pub mod throttle;

// Re-export commonly used types
pub use config::Config;
pub use consumer::{ConsumerContext, ConsumerRuntime, MessageHandler, Outcome};
pub use dead_letter::{DeadLetterRecord, DeadLetterSink, ErrorValue};
pub use envelope::{decode, is_legacy_format, Message};
pub use error::{DecodeError, ProbeError, ProcessingError, PublishError};
pub use producer::Producer;
pub use queue::{BrokerPublisher, DeliveryMode, Publisher, QueueDepth, DEAD_LETTER_ROUTING_KEY};
pub use throttle::Throttle;
