//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - The broker seam (`Connector`, `Channel`, `Delivery`) with a lapin-backed
//!   AMQP implementation
//! - `BrokerConnection`, the single shared connection per process
//! - `Queue`, a named durable work queue with publish and consume
//! - Message types for the two-queue pipeline
//!
//! ## Architecture
//!
//! ```text
//! Scheduler → book_rental_notifications → NotificationWorker → events_email_queue → EmailWorker → Mailgun
//! ```

pub mod amqp;
pub mod connection;
pub mod durable;
pub mod handler;
#[cfg(test)]
pub(crate) mod memory;
pub mod types;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub use amqp::AmqpConnector;
pub use connection::{BrokerConnection, ConnectionState};
pub use durable::{Queue, DEFAULT_PREFETCH, DEFAULT_REQUEUE_DELAY};
pub use handler::{decode_payload, HandlerError, MessageHandler};
pub use types::{
    Attachment, OutboundEmail, OverdueNotice, RentalNotification, EMAIL_QUEUE,
    NOTIFICATION_QUEUE,
};

/// A queued message: a JSON object with no schema enforced at the broker layer.
///
/// Each consumer decides which shape it expects (see [`decode_payload`]).
pub type Message = serde_json::Map<String, serde_json::Value>;

/// Result alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Stream of deliveries returned by [`Channel::consume`].
pub type Deliveries = BoxStream<'static, BrokerResult<Delivery>>;

/// Errors raised by the broker layer.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("failed to open channel: {0}")]
    Channel(String),

    #[error("failed to declare queue {queue}: {reason}")]
    Declare { queue: String, reason: String },

    #[error("failed to publish to {queue}: {reason}")]
    Publish { queue: String, reason: String },

    #[error("consumer on {queue} failed: {reason}")]
    Consume { queue: String, reason: String },

    #[error("failed to settle delivery {delivery_tag}: {reason}")]
    Settle { delivery_tag: u64, reason: String },

    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no consumer handler registered for queue {0}")]
    NoConsumer(String),

    #[error("broker channel is closed")]
    Closed,
}

/// Opens physical connections to a broker.
///
/// Each call yields a fresh connection with one channel on it;
/// [`BrokerConnection`] makes sure this happens at most once at a time.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> BrokerResult<Arc<dyn Channel>>;
}

/// A channel on a live broker connection.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Whether both the channel and its connection are still usable.
    fn is_open(&self) -> bool;

    /// Declare a durable queue. Declaring an existing queue is a no-op.
    async fn declare_queue(&self, queue: &str) -> BrokerResult<()>;

    /// Publish a persistent message to `queue` through the default exchange.
    async fn publish(&self, queue: &str, body: &[u8]) -> BrokerResult<()>;

    /// Register a consumer with at most `prefetch` unacknowledged deliveries.
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> BrokerResult<Deliveries>;

    async fn close(&self) -> BrokerResult<()>;
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> BrokerResult<()>;
    async fn nack(&self, requeue: bool) -> BrokerResult<()>;
}

/// A message handed out by the broker, waiting to be settled.
///
/// Settling consumes the delivery, so it can be acknowledged at most once.
pub struct Delivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub data: Vec<u8>,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, redelivered: bool, data: Vec<u8>, acker: Box<dyn Acker>) -> Self {
        Self {
            delivery_tag,
            redelivered,
            data,
            acker,
        }
    }

    /// Acknowledge: the broker discards the message.
    pub async fn ack(self) -> BrokerResult<()> {
        self.acker.ack().await
    }

    /// Negative-acknowledge with requeue: the message is redelivered later.
    pub async fn nack_requeue(self) -> BrokerResult<()> {
        self.acker.nack(true).await
    }

    /// Negative-acknowledge without requeue. The broker drops the message or
    /// routes it to the queue's dead-letter exchange when one is configured.
    pub async fn reject(self) -> BrokerResult<()> {
        self.acker.nack(false).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("body_length", &self.data.len())
            .finish()
    }
}
