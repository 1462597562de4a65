//! Message envelope codec.
//!
//! Producers migrated from PHP `serialize()` to JSON without a version flag on
//! the wire, so every payload is first tested for the legacy format and only
//! then parsed as JSON.
//!
//! ## Decode Flow
//!
//! ```text
//! raw bytes → is_legacy_format? ─yes→ legacy::unserialize ─┐
//!                               └─no──→ serde_json ─────────┴→ Message { body, original, payload }
//! ```

pub mod legacy;

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::DecodeError;
use crate::queue::DeliveryHandle;

pub use legacy::LEGACY_FALSE;

/// Bytes of an undecodable payload kept for diagnostics.
pub const PREVIEW_BYTES: usize = 500;

/// One unit of work decoded from the broker.
///
/// `original` is captured before anything can touch the body and is the
/// value dead-lettered on failure. The delivery handle lives beside the
/// body, never inside it, so it cannot leak into `original` or onto the wire.
#[derive(Debug, Clone)]
pub struct Message {
    /// Business fields supplied by the producer; hooks may mutate these
    pub body: Value,
    original: Value,
    payload: Option<Arc<DeliveryHandle>>,
}

impl Message {
    /// Wrap a decoded body, snapshotting it as the original.
    pub fn new(body: Value) -> Self {
        Self {
            original: body.clone(),
            body,
            payload: None,
        }
    }

    /// Attach the broker delivery this message arrived on.
    pub fn with_payload(mut self, payload: Arc<DeliveryHandle>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The body exactly as first decoded.
    pub fn original(&self) -> &Value {
        &self.original
    }

    pub fn payload(&self) -> Option<&Arc<DeliveryHandle>> {
        self.payload.as_ref()
    }

    /// Top-level field of a map body.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Set a top-level field, turning a non-map body into an empty map first.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        if !self.body.is_object() {
            self.body = Value::Object(Default::default());
        }
        self.body
            .as_object_mut()
            .and_then(|map| map.insert(key.into(), value))
    }
}

/// Whether `raw` is in the legacy serialized format.
///
/// A trial decode yielding `false` is indistinguishable from a failed decode
/// in the legacy format, so the exact encoding of `false` is checked first.
pub fn is_legacy_format(raw: &[u8]) -> bool {
    if raw == LEGACY_FALSE {
        return true;
    }
    matches!(legacy::unserialize(raw), Ok(value) if value != Value::Bool(false))
}

/// Decode a raw payload into its body value.
pub fn decode_body(raw: &[u8]) -> Result<Value, DecodeError> {
    if is_legacy_format(raw) {
        debug!(format = "legacy", body_length = raw.len(), "envelope_decoded");
        return legacy::unserialize(raw).map_err(|_| decode_error(raw));
    }

    let body = serde_json::from_slice(raw).map_err(|_| decode_error(raw))?;
    debug!(format = "json", body_length = raw.len(), "envelope_decoded");
    Ok(body)
}

/// Decode a raw payload into a [`Message`], attaching the delivery handle
/// after the original has been captured.
pub fn decode(raw: &[u8], payload: Option<Arc<DeliveryHandle>>) -> Result<Message, DecodeError> {
    let message = Message::new(decode_body(raw)?);
    Ok(match payload {
        Some(handle) => message.with_payload(handle),
        None => message,
    })
}

fn decode_error(raw: &[u8]) -> DecodeError {
    DecodeError {
        length: raw.len(),
        preview: String::from_utf8_lossy(&raw[..raw.len().min(PREVIEW_BYTES)]).into_owned(),
    }
}
