//! Per-message consumer lifecycle.
//!
//! ```text
//! Idle → Receiving → Decoding → Dispatching → Completed ─┐
//!                       │            └──────→ DeadLettered ─┴→ Idle
//!                       └─(DecodeError)─────→ DeadLettered
//! ```
//!
//! Every delivery is acknowledged once its outcome is known, so a bad message
//! never blocks the queue and never stops the consumer.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::consumer::handler::{ConsumerContext, MessageHandler};
use crate::dead_letter::{DeadLetterSink, ErrorValue};
use crate::envelope::{self, Message};
use crate::management::QueueStatusProbe;
use crate::queue::{DeliveryHandle, IncomingDelivery};
use crate::throttle::Throttle;

/// Dead-letter location for payloads that fail to decode.
pub const LOCATION_CONSUME: &str = "consumeQueue";
pub const LOCATION_SETTER: &str = "setter";
pub const LOCATION_CAN_PROCESS: &str = "canProcess";
pub const LOCATION_PROCESS: &str = "process";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Receiving,
    Decoding,
    Dispatching,
    Completed,
    DeadLettered,
}

/// How a single delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `process` ran to completion
    Completed,
    /// `can_process` declined the message
    Skipped,
    /// A decode or hook failure was dead-lettered at `location`
    DeadLettered { location: &'static str },
    /// `process` overran its deadline and was dead-lettered; the channel
    /// should be reset
    TimedOut,
}

/// Drives a [`MessageHandler`] over deliveries one at a time.
pub struct ConsumerRuntime<H> {
    handler: H,
    throttle: Throttle,
    probe: Option<Arc<dyn QueueStatusProbe>>,
    dead_letter: DeadLetterSink,
    process_timeout: Option<Duration>,
    state: ConsumerState,
}

impl<H: MessageHandler> ConsumerRuntime<H> {
    pub fn new(handler: H, dead_letter: DeadLetterSink) -> Self {
        Self {
            handler,
            throttle: Throttle::new(),
            probe: None,
            dead_letter,
            process_timeout: None,
            state: ConsumerState::Idle,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn QueueStatusProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    /// Bound every `process` call; `None` lets it run indefinitely.
    pub fn with_process_timeout(mut self, process_timeout: Option<Duration>) -> Self {
        self.process_timeout = process_timeout;
        self
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Handle one delivery end to end and acknowledge it.
    pub async fn on_delivery(&mut self, delivery: IncomingDelivery) -> Outcome {
        self.transition(ConsumerState::Receiving);

        let handle = Arc::new(DeliveryHandle::new(delivery.info, delivery.acker));

        self.transition(ConsumerState::Decoding);

        let outcome = match envelope::decode(&delivery.body, Some(Arc::clone(&handle))) {
            Ok(message) => self.dispatch(message).await,
            Err(e) => {
                warn!(
                    delivery_tag = handle.info().delivery_tag,
                    error = %e,
                    "consumer_decode_failed"
                );
                self.transition(ConsumerState::DeadLettered);
                self.dead_letter
                    .send_undecoded(handle.info(), LOCATION_CONSUME, ErrorValue::from(&e))
                    .await;
                Outcome::DeadLettered {
                    location: LOCATION_CONSUME,
                }
            }
        };

        if let Err(e) = handle.ack().await {
            error!(
                delivery_tag = e.delivery_tag,
                error = %e,
                "rabbitmq_ack_failed"
            );
        }

        info!(
            delivery_tag = handle.info().delivery_tag,
            routing_key = %handle.info().routing_key,
            outcome = ?outcome,
            "consumer_message_finished"
        );

        self.transition(ConsumerState::Idle);
        outcome
    }

    async fn dispatch(&mut self, mut message: Message) -> Outcome {
        self.transition(ConsumerState::Dispatching);

        if let Err(e) = self.handler.setter(&mut message) {
            return self.fail(&message, LOCATION_SETTER, e).await;
        }

        let can_process = {
            let mut ctx = ConsumerContext::new(&mut self.throttle, self.probe.as_deref());
            self.handler.can_process(&message, &mut ctx).await
        };

        match can_process {
            Ok(true) => {}
            Ok(false) => {
                debug!("consumer_message_skipped");
                self.transition(ConsumerState::Completed);
                return Outcome::Skipped;
            }
            Err(e) => return self.fail(&message, LOCATION_CAN_PROCESS, e).await,
        }

        let processed = {
            let mut ctx = ConsumerContext::new(&mut self.throttle, self.probe.as_deref());
            let work = self.handler.process(&message, &mut ctx);
            match self.process_timeout {
                Some(limit) => timeout(limit, work).await.map_err(|_| limit),
                None => Ok(work.await),
            }
        };

        match processed {
            Ok(Ok(())) => {
                self.transition(ConsumerState::Completed);
                Outcome::Completed
            }
            Ok(Err(e)) => self.fail(&message, LOCATION_PROCESS, e).await,
            Err(limit) => {
                warn!(
                    timeout_ms = limit.as_millis() as u64,
                    "consumer_process_timeout"
                );
                self.transition(ConsumerState::DeadLettered);
                let reason = format!("processing deadline of {}ms exceeded", limit.as_millis());
                self.dead_letter
                    .send(&message, LOCATION_PROCESS, ErrorValue::Text(reason))
                    .await;
                Outcome::TimedOut
            }
        }
    }

    async fn fail(&mut self, message: &Message, location: &'static str, e: anyhow::Error) -> Outcome {
        warn!(location = location, error = %format!("{:#}", e), "consumer_hook_failed");
        self.transition(ConsumerState::DeadLettered);
        self.dead_letter
            .send(message, location, ErrorValue::from_anyhow(&e))
            .await;
        Outcome::DeadLettered { location }
    }

    fn transition(&mut self, next: ConsumerState) {
        debug!(from = ?self.state, to = ?next, "consumer_state_transition");
        self.state = next;
    }
}
