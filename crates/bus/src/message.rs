//! Transport envelopes and the message information passed to listeners.

use chrono::{DateTime, Utc};
use common::{CorrelationId, MessageId};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::Result;

/// A typed message that can travel over a transport.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    /// Name used to route the message to its handlers.
    const MESSAGE_TYPE: &'static str;

    /// Correlation id of the conversation this message belongs to, if any.
    fn correlation_id(&self) -> Option<CorrelationId> {
        None
    }
}

/// A message as carried by the transport: routing data plus a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportMessage {
    pub id: MessageId,
    pub message_type: String,
    pub correlation_id: Option<CorrelationId>,
    /// Endpoint the message was sent from.
    pub source: String,
    pub sent_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl TransportMessage {
    /// Wraps a typed message.
    pub fn new<M: Message>(message: &M, source: impl Into<String>) -> Result<Self> {
        Ok(Self {
            id: MessageId::new(),
            message_type: M::MESSAGE_TYPE.to_string(),
            correlation_id: message.correlation_id(),
            source: source.into(),
            sent_at: Utc::now(),
            payload: serde_json::to_value(message)?,
        })
    }

    /// Builds an envelope around a raw payload, bypassing typed serialization.
    pub fn raw(
        message_type: impl Into<String>,
        payload: serde_json::Value,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            message_type: message_type.into(),
            correlation_id: None,
            source: source.into(),
            sent_at: Utc::now(),
            payload,
        }
    }
}

/// What lifecycle listeners learn about the message being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentMessageInformation {
    pub message_id: MessageId,
    pub message_type: String,
    pub correlation_id: Option<CorrelationId>,
    pub source: String,
}

impl From<&TransportMessage> for CurrentMessageInformation {
    fn from(message: &TransportMessage) -> Self {
        Self {
            message_id: message.id,
            message_type: message.message_type.clone(),
            correlation_id: message.correlation_id,
            source: message.source.clone(),
        }
    }
}
