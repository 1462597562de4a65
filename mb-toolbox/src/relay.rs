//! Relay handler - republishes accepted messages under a new routing key.
//!
//! Messages missing the required field are dropped. Before each publish the
//! relay throttles itself and, when a target queue is configured, backs off
//! while that queue is over its ready ceiling.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{info, warn};

use mb_toolbox::{Config, ConsumerContext, DeliveryMode, Message, MessageHandler, Producer};

/// How long to wait when the target queue is over its ceiling.
const BACKPRESSURE_PAUSE: Duration = Duration::from_secs(10);

pub struct RelayHandler {
    producer: Producer,
    routing_key: String,
    required_field: Option<String>,
    target_queue: Option<String>,
    max_ready: u64,
    max_message_rate: u32,
    backpressure_pause: Duration,
    outgoing: Option<Value>,
}

impl RelayHandler {
    pub fn new(config: &Config, producer: Producer) -> Self {
        Self {
            producer,
            routing_key: config.relay_routing_key.clone(),
            required_field: config.relay_required_field.clone(),
            target_queue: config.relay_target_queue.clone(),
            max_ready: config.relay_max_ready,
            max_message_rate: config.max_message_rate,
            backpressure_pause: BACKPRESSURE_PAUSE,
            outgoing: None,
        }
    }

    /// Whether the target queue is known to be over its ceiling.
    async fn target_saturated(&self, ctx: &ConsumerContext<'_>) -> bool {
        let Some(queue) = &self.target_queue else {
            return false;
        };

        match ctx.queue_status(queue).await {
            Some(depth) if depth.ready >= self.max_ready => {
                warn!(
                    queue = %queue,
                    ready = depth.ready,
                    max_ready = self.max_ready,
                    "relay_target_saturated"
                );
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl MessageHandler for RelayHandler {
    fn setter(&mut self, message: &mut Message) -> anyhow::Result<()> {
        self.outgoing = Some(self.producer.build_envelope(message.body.clone()));
        Ok(())
    }

    async fn can_process(
        &mut self,
        message: &Message,
        _ctx: &mut ConsumerContext<'_>,
    ) -> anyhow::Result<bool> {
        let Some(field) = &self.required_field else {
            return Ok(true);
        };

        let present = match message.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        };

        if !present {
            info!(field = %field, "relay_message_skipped");
        }

        Ok(present)
    }

    async fn process(
        &mut self,
        _message: &Message,
        ctx: &mut ConsumerContext<'_>,
    ) -> anyhow::Result<()> {
        ctx.throttle(self.max_message_rate).await;

        if self.target_saturated(ctx).await {
            sleep(self.backpressure_pause).await;
        }

        let outgoing = self
            .outgoing
            .take()
            .context("setter did not prepare an outgoing message")?;

        self.producer
            .publish(&outgoing, &self.routing_key, DeliveryMode::Persistent)
            .await
            .context("Failed to relay message")?;

        info!(routing_key = %self.routing_key, "relay_message_forwarded");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mb_toolbox::error::{ProbeError, PublishError};
    use mb_toolbox::management::QueueStatusProbe;
    use mb_toolbox::{BrokerPublisher, QueueDepth, Throttle};
    use serde_json::json;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(Value, String)>>,
    }

    #[async_trait]
    impl BrokerPublisher for RecordingPublisher {
        async fn publish(
            &self,
            body: &[u8],
            routing_key: &str,
            _mode: DeliveryMode,
        ) -> Result<(), PublishError> {
            let value = serde_json::from_slice(body)?;
            self.published
                .lock()
                .await
                .push((value, routing_key.to_string()));
            Ok(())
        }
    }

    struct FixedProbe(QueueDepth);

    #[async_trait]
    impl QueueStatusProbe for FixedProbe {
        async fn queue_status(&self, _queue: &str) -> Result<QueueDepth, ProbeError> {
            Ok(self.0)
        }
    }

    fn second() -> u32 {
        0
    }

    fn handler(publisher: Arc<RecordingPublisher>) -> RelayHandler {
        let mut config = Config::from_env();
        config.relay_routing_key = "user.registration.relay".to_string();
        config.relay_required_field = Some("email".to_string());
        config.relay_target_queue = Some("userRegistrationQueue".to_string());
        config.relay_max_ready = 100;
        config.max_message_rate = 1000;

        let mut handler = RelayHandler::new(&config, Producer::new(publisher));
        handler.backpressure_pause = Duration::from_secs(1);
        handler
    }

    #[tokio::test]
    async fn test_skips_message_without_required_field() {
        let mut handler = handler(Arc::new(RecordingPublisher::default()));
        let mut throttle = Throttle::with_clock(second, Duration::ZERO);
        let mut ctx = ConsumerContext::new(&mut throttle, None);

        let missing = Message::new(json!({"mobile": "5555550100"}));
        let empty = Message::new(json!({"email": ""}));
        let present = Message::new(json!({"email": "a@b.com"}));

        assert!(!handler.can_process(&missing, &mut ctx).await.unwrap());
        assert!(!handler.can_process(&empty, &mut ctx).await.unwrap());
        assert!(handler.can_process(&present, &mut ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_process_forwards_envelope() {
        let publisher = Arc::new(RecordingPublisher::default());
        let mut handler = handler(Arc::clone(&publisher));
        let mut throttle = Throttle::with_clock(second, Duration::ZERO);
        let mut message = Message::new(json!({"email": "a@b.com"}));

        handler.setter(&mut message).unwrap();
        let mut ctx = ConsumerContext::new(&mut throttle, None);
        handler.process(&message, &mut ctx).await.unwrap();

        let published = publisher.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0["email"], "a@b.com");
        assert!(published[0].0["startTime"].is_string());
        assert_eq!(published[0].1, "user.registration.relay");
    }

    #[tokio::test]
    async fn test_process_without_setter_fails() {
        let mut handler = handler(Arc::new(RecordingPublisher::default()));
        let mut throttle = Throttle::with_clock(second, Duration::ZERO);
        let mut ctx = ConsumerContext::new(&mut throttle, None);

        let result = handler
            .process(&Message::new(json!({"email": "a@b.com"})), &mut ctx)
            .await;

        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backs_off_when_target_saturated() {
        let publisher = Arc::new(RecordingPublisher::default());
        let mut handler = handler(Arc::clone(&publisher));
        let mut throttle = Throttle::with_clock(second, Duration::ZERO);
        let probe = FixedProbe(QueueDepth { ready: 150, unacked: 0 });
        let mut message = Message::new(json!({"email": "a@b.com"}));
        let start = tokio::time::Instant::now();

        handler.setter(&mut message).unwrap();
        let mut ctx = ConsumerContext::new(&mut throttle, Some(&probe));
        handler.process(&message, &mut ctx).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(publisher.published.lock().await.len(), 1);
    }
}
