use std::time::Duration;

use thiserror::Error;

/// Errors raised by the broker transport and the messaging patterns built on it.
///
/// These never reach end users; callers translate them into their own
/// fail-closed errors.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The outbound payload is not valid JSON. This is a caller bug.
    #[error("Invalid JSON payload for {target}: {reason}")]
    InvalidPayload { target: String, reason: String },

    /// No correlated reply arrived in time.
    #[error("RPC call to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    /// Connection or pool failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Error reported by the AMQP client.
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// The named exchange or queue does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// A consumer stream ended or its reply channel was dropped.
    #[error("Consumer closed on queue {queue}")]
    ConsumerClosed { queue: String },

    /// A reply body was not valid UTF-8.
    #[error("Reply is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
