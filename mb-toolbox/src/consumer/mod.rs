//! Consumer runtime.
//!
//! This module provides:
//! - The [`MessageHandler`] hooks each concrete consumer implements
//! - The [`ConsumerRuntime`] state machine that decodes, dispatches and
//!   dead-letters deliveries
//! - The lapin run loop feeding deliveries to the runtime

pub mod amqp;
pub mod handler;
pub mod runtime;

pub use amqp::{run, runtime_from_config};
pub use handler::{ConsumerContext, MessageHandler};
pub use runtime::{
    ConsumerRuntime, ConsumerState, Outcome, LOCATION_CAN_PROCESS, LOCATION_CONSUME,
    LOCATION_PROCESS, LOCATION_SETTER,
};
