//! Error types shared by the consumer and producer runtimes.

/// A queue payload that is neither legacy-serialized nor JSON.
#[derive(Debug, thiserror::Error)]
#[error("undecodable payload ({length} bytes): {preview}")]
pub struct DecodeError {
    /// Total payload length in bytes
    pub length: usize,
    /// Lossy UTF-8 rendering of the first bytes of the payload
    pub preview: String,
}

/// Failure publishing to the broker. Producers propagate these unchanged.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to connect to RabbitMQ: {0}")]
    Connect(#[source] lapin::Error),

    #[error("failed to create channel: {0}")]
    Channel(#[source] lapin::Error),

    #[error("failed to declare topology: {0}")]
    Declare(#[source] lapin::Error),

    #[error("failed to publish to {exchange}: {source}")]
    Publish {
        exchange: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to confirm publish: {0}")]
    Confirm(#[source] lapin::Error),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Broker-side failure reported by an acknowledger.
pub type AckFailure = Box<dyn std::error::Error + Send + Sync>;

/// Failure acknowledging a delivery.
#[derive(Debug, thiserror::Error)]
#[error("failed to acknowledge delivery {delivery_tag}: {source}")]
pub struct AckError {
    pub delivery_tag: u64,
    #[source]
    pub source: AckFailure,
}

/// Failure reading queue depth from the management API.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid management url: {0}")]
    Url(String),

    #[error("management request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("management api returned status {0}")]
    Status(u16),

    #[error("malformed management response: {0}")]
    Body(#[from] serde_json::Error),
}

/// Structured error raised by consumer hooks.
///
/// Hooks return `anyhow::Result`; raising this type (directly or wrapped in
/// context) lets the dead letter carry an error kind and an explicit code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ProcessingError {
    pub kind: String,
    pub message: String,
    pub code: Option<i64>,
}

impl ProcessingError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }
}
