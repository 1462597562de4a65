//! Dead-letter capture.
//!
//! A message that cannot be processed is never dropped silently: it is wrapped
//! with routing and error metadata and published to the dead-letter exchange
//! with the `deadLetter` routing key, from where it can be inspected or
//! replayed out of band.
//!
//! ## Wire Format
//!
//! ```text
//! {
//!   "message": { ...original body... },
//!   "metadata": {
//!     "amqp":  { "exchange", "routing_key", "consumer_tag" },
//!     "error": { "date", "locationText", "message", "exception",
//!                "exceptionCode", "exceptionTrace", "trace" }
//!   }
//! }
//! ```

use std::backtrace::Backtrace;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::envelope::Message;
use crate::error::{DecodeError, ProcessingError};
use crate::queue::{BrokerPublisher, DeliveryInfo, DeliveryMode, DEAD_LETTER_ROUTING_KEY};

/// Stands in for a field that could not be encoded.
pub const UNENCODABLE_PLACEHOLDER: &str = "[unencodable]";

/// One failed message plus its forensic context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    pub metadata: DeadLetterMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amqp: Option<DeliveryInfo>,
    pub error: ErrorMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMetadata {
    /// RFC 2822 time of capture
    pub date: String,
    /// Where the failure happened, e.g. `consumeQueue` or `process`
    pub location_text: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_trace: Option<String>,
    /// Call stack at the point the dead letter was raised
    pub trace: String,
}

/// The failure being dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorValue {
    /// A structured error with a kind and, when explicitly set, a code
    Exception {
        kind: String,
        message: String,
        code: Option<i64>,
        trace: String,
    },
    /// Free text
    Text(String),
}

impl ErrorValue {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let (kind, code) = if let Some(processing) = err.downcast_ref::<ProcessingError>() {
            (processing.kind.clone(), processing.code)
        } else if err.downcast_ref::<DecodeError>().is_some() {
            ("DecodeError".to_string(), None)
        } else {
            ("Error".to_string(), None)
        };

        ErrorValue::Exception {
            kind,
            message: format!("{:#}", err),
            code,
            trace: format!("{:?}", err),
        }
    }
}

impl From<&DecodeError> for ErrorValue {
    fn from(err: &DecodeError) -> Self {
        ErrorValue::Exception {
            kind: "DecodeError".to_string(),
            message: err.to_string(),
            code: None,
            trace: format!("{:?}", err),
        }
    }
}

impl From<&str> for ErrorValue {
    fn from(text: &str) -> Self {
        ErrorValue::Text(text.to_string())
    }
}

impl From<String> for ErrorValue {
    fn from(text: String) -> Self {
        ErrorValue::Text(text)
    }
}

impl DeadLetterRecord {
    /// Build a record. Missing pieces are omitted rather than failing.
    pub fn build(
        original: Option<&Value>,
        delivery: Option<&DeliveryInfo>,
        location: &str,
        error: ErrorValue,
    ) -> Self {
        let (message, exception, exception_code, exception_trace) = match error {
            ErrorValue::Exception {
                kind,
                message,
                code,
                trace,
            } => (message, Some(kind), code, Some(trace)),
            ErrorValue::Text(message) => (message, None, None, None),
        };

        Self {
            message: original.cloned(),
            metadata: DeadLetterMetadata {
                amqp: delivery.cloned(),
                error: ErrorMetadata {
                    date: Utc::now().to_rfc2822(),
                    location_text: location.to_string(),
                    message,
                    exception,
                    exception_code,
                    exception_trace,
                    trace: Backtrace::force_capture().to_string(),
                },
            },
        }
    }

    /// Serialize to JSON, substituting a placeholder for a body that cannot
    /// be encoded so the metadata always survives.
    pub fn encode(&self) -> Vec<u8> {
        if let Ok(body) = serde_json::to_vec(self) {
            return body;
        }

        let mut fallback = self.clone();
        fallback.message = Some(Value::String(UNENCODABLE_PLACEHOLDER.to_string()));
        if let Ok(body) = serde_json::to_vec(&fallback) {
            return body;
        }

        serde_json::to_vec(&json!({
            "message": UNENCODABLE_PLACEHOLDER,
            "metadata": {
                "error": {
                    "date": self.metadata.error.date,
                    "locationText": self.metadata.error.location_text,
                    "message": self.metadata.error.message,
                    "trace": UNENCODABLE_PLACEHOLDER,
                }
            }
        }))
        .unwrap_or_default()
    }
}

/// Publishes dead letters on a connection of its own.
#[derive(Clone)]
pub struct DeadLetterSink {
    publisher: Arc<dyn BrokerPublisher>,
}

impl DeadLetterSink {
    pub fn new(publisher: Arc<dyn BrokerPublisher>) -> Self {
        Self { publisher }
    }

    /// Dead-letter a decoded message. Never fails; publish errors are logged.
    pub async fn send(&self, message: &Message, location: &str, error: ErrorValue) {
        let delivery = message.payload().map(|handle| handle.info());
        let record = DeadLetterRecord::build(Some(message.original()), delivery, location, error);
        self.publish(record).await;
    }

    /// Dead-letter a delivery that never decoded into a message.
    pub async fn send_undecoded(&self, delivery: &DeliveryInfo, location: &str, error: ErrorValue) {
        let record = DeadLetterRecord::build(None, Some(delivery), location, error);
        self.publish(record).await;
    }

    async fn publish(&self, record: DeadLetterRecord) {
        let body = record.encode();

        match self
            .publisher
            .publish(&body, DEAD_LETTER_ROUTING_KEY, DeliveryMode::Persistent)
            .await
        {
            Ok(()) => info!(
                location = %record.metadata.error.location_text,
                error = %record.metadata.error.message,
                body_length = body.len(),
                "dead_letter_published"
            ),
            Err(e) => error!(
                location = %record.metadata.error.location_text,
                error = %record.metadata.error.message,
                publish_error = %e,
                "dead_letter_publish_failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn delivery() -> DeliveryInfo {
        DeliveryInfo {
            exchange: "transactionalExchange".to_string(),
            routing_key: "campaign.signup.transactional".to_string(),
            consumer_tag: "mbc-transactional".to_string(),
            delivery_tag: 3,
        }
    }

    #[test]
    fn test_record_from_plain_error_has_no_code() {
        let err = anyhow!("downstream timeout");
        let record = DeadLetterRecord::build(
            Some(&json!({"email": "a@b.com"})),
            Some(&delivery()),
            "process",
            ErrorValue::from_anyhow(&err),
        );

        let json: Value = serde_json::from_slice(&record.encode()).unwrap();
        let error = &json["metadata"]["error"];

        assert_eq!(error["message"], "downstream timeout");
        assert_eq!(error["locationText"], "process");
        assert_eq!(error["exception"], "Error");
        assert!(error.get("exceptionCode").is_none());
        assert!(error["trace"].is_string());
        assert_eq!(json["message"], json!({"email": "a@b.com"}));
        assert_eq!(json["metadata"]["amqp"]["consumer_tag"], "mbc-transactional");
    }

    #[test]
    fn test_record_keeps_explicit_code() {
        let err = anyhow::Error::new(ProcessingError::new("MailchimpError", "list not found").with_code(404));
        let record =
            DeadLetterRecord::build(None, None, "process", ErrorValue::from_anyhow(&err));

        assert_eq!(record.metadata.error.exception.as_deref(), Some("MailchimpError"));
        assert_eq!(record.metadata.error.exception_code, Some(404));
    }

    #[test]
    fn test_context_is_kept_in_message() {
        let err = anyhow::Error::new(ProcessingError::new("HttpError", "503 from Northstar"))
            .context("Failed to look up user");
        let value = ErrorValue::from_anyhow(&err);

        match value {
            ErrorValue::Exception { kind, message, .. } => {
                assert_eq!(kind, "HttpError");
                assert_eq!(message, "Failed to look up user: 503 from Northstar");
            }
            ErrorValue::Text(_) => panic!("Expected structured error"),
        }
    }

    #[test]
    fn test_text_error_and_missing_fields_are_omitted() {
        let record = DeadLetterRecord::build(None, None, "consumeQueue", "bad payload".into());
        let json: Value = serde_json::from_slice(&record.encode()).unwrap();

        assert!(json.get("message").is_none());
        assert!(json["metadata"].get("amqp").is_none());
        assert_eq!(json["metadata"]["error"]["message"], "bad payload");
        assert!(json["metadata"]["error"].get("exception").is_none());
        assert!(json["metadata"]["error"].get("exceptionTrace").is_none());
    }

    #[test]
    fn test_date_is_rfc2822() {
        let record = DeadLetterRecord::build(None, None, "process", "x".into());

        assert!(chrono::DateTime::parse_from_rfc2822(&record.metadata.error.date).is_ok());
    }
}
