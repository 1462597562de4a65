//! The hooks a concrete consumer implements.

use async_trait::async_trait;
use tracing::warn;

use crate::envelope::Message;
use crate::management::QueueStatusProbe;
use crate::queue::QueueDepth;
use crate::throttle::Throttle;

/// Consumer-specific logic, driven by [`ConsumerRuntime`](super::ConsumerRuntime).
///
/// For every decoded message the runtime calls `setter`, then `can_process`,
/// and only when that returns `true`, `process`. An error from any hook is
/// dead-lettered with the hook's name as the location; it never stops the
/// consumer.
#[async_trait]
pub trait MessageHandler: Send {
    /// Pull the values processing needs out of the message. No I/O.
    fn setter(&mut self, message: &mut Message) -> anyhow::Result<()>;

    /// Whether the message should be processed. `false` acks and drops it.
    async fn can_process(
        &mut self,
        message: &Message,
        ctx: &mut ConsumerContext<'_>,
    ) -> anyhow::Result<bool>;

    /// Do the work.
    async fn process(&mut self, message: &Message, ctx: &mut ConsumerContext<'_>)
        -> anyhow::Result<()>;
}

/// Runtime facilities available to hooks while a message is dispatched.
pub struct ConsumerContext<'a> {
    pub(crate) throttle: &'a mut Throttle,
    pub(crate) probe: Option<&'a dyn QueueStatusProbe>,
}

impl<'a> ConsumerContext<'a> {
    pub fn new(throttle: &'a mut Throttle, probe: Option<&'a dyn QueueStatusProbe>) -> Self {
        Self { throttle, probe }
    }

    /// Pause the consumer if more than `max_message_rate` messages were
    /// handled this second.
    pub async fn throttle(&mut self, max_message_rate: u32) {
        self.throttle.tick(max_message_rate).await;
    }

    /// Ready/unacked depth of `queue`, or `None` when it cannot be read.
    pub async fn queue_status(&self, queue: &str) -> Option<QueueDepth> {
        let probe = self.probe?;

        match probe.queue_status(queue).await {
            Ok(depth) => Some(depth),
            Err(e) => {
                warn!(queue = queue, error = %e, "queue_status_unknown");
                None
            }
        }
    }
}
