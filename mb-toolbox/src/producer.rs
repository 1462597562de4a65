//! Producer runtime.
//!
//! Producers are short-lived CLI runs: there is no retry or buffering, and a
//! publish failure is returned to the caller so the process can exit non-zero.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::PublishError;
use crate::queue::{BrokerPublisher, DeliveryMode};

/// Builds message envelopes and publishes them through a broker publisher.
#[derive(Clone)]
pub struct Producer {
    publisher: Arc<dyn BrokerPublisher>,
    start_time: DateTime<Utc>,
}

impl Producer {
    /// Create a producer; its construction time becomes `startTime` on every envelope.
    pub fn new(publisher: Arc<dyn BrokerPublisher>) -> Self {
        Self {
            publisher,
            start_time: Utc::now(),
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Copy `data` and stamp it with `requested` (now) and `startTime`.
    pub fn build_envelope(&self, data: Value) -> Value {
        self.build_envelope_at(data, Utc::now())
    }

    /// [`build_envelope`](Self::build_envelope) with an explicit request time.
    pub fn build_envelope_at(&self, data: Value, requested: DateTime<Utc>) -> Value {
        let mut map = match data {
            Value::Object(map) => map,
            Value::Null => Default::default(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };

        map.insert("requested".to_string(), Value::String(iso8601(requested)));
        map.insert("startTime".to_string(), Value::String(iso8601(self.start_time)));

        Value::Object(map)
    }

    /// Serialize `message` as JSON and publish it.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        message: &T,
        routing_key: &str,
        mode: DeliveryMode,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_vec(message)?;
        self.publisher.publish(&body, routing_key, mode).await?;

        info!(
            routing_key = routing_key,
            persistent = mode == DeliveryMode::Persistent,
            "producer_message_published"
        );

        Ok(())
    }
}

fn iso8601(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, false)
}
