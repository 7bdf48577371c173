//! Bus error types.

use thiserror::Error;

/// Boxed error returned by message handlers and lifecycle listeners.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while processing a message.
#[derive(Debug, Error)]
pub enum BusError {
    /// The message payload could not be deserialized into the handler's type.
    #[error("Failed to deserialize {message_type} message: {source}")]
    Serialization {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// A message handler returned an error.
    #[error("Handler for {message_type} failed: {source}")]
    Handler {
        message_type: String,
        #[source]
        source: BoxError,
    },

    /// A lifecycle listener failed while the message transaction was committing.
    #[error("Message transaction commit failed: {0}")]
    Commit(#[source] BoxError),

    /// No handler is registered for the message type.
    #[error("No handler registered for message type {0}")]
    NoHandler(String),

    /// An outgoing message could not be serialized.
    #[error("Failed to serialize outgoing message: {0}")]
    Encode(#[from] serde_json::Error),

    /// The transport's worker queue is not running.
    #[error("Transport is not running")]
    TransportStopped,
}

impl BusError {
    /// Returns true if the failure happened while deserializing the payload.
    pub fn is_serialization(&self) -> bool {
        matches!(self, BusError::Serialization { .. })
    }
}

/// Convenience type alias for bus results.
pub type Result<T> = std::result::Result<T, BusError>;
