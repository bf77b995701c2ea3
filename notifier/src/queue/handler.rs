//! Consumer-side handler seam.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::Message;

/// Why a handler could not process a message.
///
/// The category decides how the delivery is settled:
/// - `Transient`: negative-acknowledge with requeue, so it is delivered again.
///   Redelivery is unbounded; a failure that never clears loops forever.
/// - `Permanent`: negative-acknowledge without requeue. Retrying cannot help.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(reason: impl ToString) -> Self {
        Self::Transient(reason.to_string())
    }

    pub fn permanent(reason: impl ToString) -> Self {
        Self::Permanent(reason.to_string())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

/// Processes messages delivered from a [`Queue`](super::Queue).
///
/// Returning `Ok` acknowledges the delivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

/// Decode a message into the shape a consumer expects.
///
/// A mismatch is a permanent failure: redelivering the same bytes would fail
/// the same way.
pub fn decode_payload<T: DeserializeOwned>(message: Message) -> Result<T, HandlerError> {
    serde_json::from_value(serde_json::Value::Object(message))
        .map_err(|e| HandlerError::permanent(format!("unexpected message shape: {e}")))
}
