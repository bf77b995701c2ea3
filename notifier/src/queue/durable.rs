//! Named durable work queue.
//!
//! Consumption is strictly sequential: one delivery is handled and settled
//! before the next is pulled, and the broker never hands out more than
//! `prefetch` unacknowledged messages (1 by default). After a requeue the
//! consumer pauses for `requeue_delay` before pulling again.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{
    BrokerConnection, BrokerError, BrokerResult, Delivery, HandlerError, Message, MessageHandler,
};

/// Unacknowledged deliveries allowed per consumer.
pub const DEFAULT_PREFETCH: u16 = 1;

/// Pause after requeueing a delivery before the next one is pulled.
pub const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_millis(100);

/// A durable queue bound to the process-wide [`BrokerConnection`].
pub struct Queue {
    name: String,
    connection: Arc<BrokerConnection>,
    handler: Option<Arc<dyn MessageHandler>>,
    prefetch: u16,
    requeue_delay: Duration,
}

impl Queue {
    /// Bind to `name` on `connection` and declare it (durable, idempotent).
    pub async fn declare(
        connection: Arc<BrokerConnection>,
        name: impl Into<String>,
    ) -> BrokerResult<Self> {
        let queue = Self {
            name: name.into(),
            connection,
            handler: None,
            prefetch: DEFAULT_PREFETCH,
            requeue_delay: DEFAULT_REQUEUE_DELAY,
        };

        queue.declare_queue().await?;

        Ok(queue)
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &Arc<BrokerConnection> {
        &self.connection
    }

    /// Ensure the queue exists and is durable.
    pub async fn declare_queue(&self) -> BrokerResult<()> {
        let channel = self.connection.channel().await?;
        channel.declare_queue(&self.name).await?;

        info!(queue = %self.name, "rabbitmq_queue_declared");

        Ok(())
    }

    /// Serialize `message` as JSON and publish it as a persistent message.
    ///
    /// Transport failures are returned; retrying is up to the caller.
    pub async fn publish<T: Serialize + ?Sized>(&self, message: &T) -> BrokerResult<()> {
        let body = serde_json::to_vec(message)?;
        let channel = self.connection.channel().await?;

        channel.publish(&self.name, &body).await.inspect_err(|e| {
            error!(queue = %self.name, error = %e, "rabbitmq_publish_failed");
        })?;

        info!(
            queue = %self.name,
            body_length = body.len(),
            "rabbitmq_message_published"
        );

        Ok(())
    }

    /// Register the handler invoked for each delivery. Does not start delivery.
    pub fn set_consumer(&mut self, handler: Arc<dyn MessageHandler>) {
        self.handler = Some(handler);
    }

    /// Consume until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Shutdown is only observed between deliveries: a message being handled
    /// is always settled (ack, requeue or reject) before this returns.
    /// A shutdown during the pause after a requeue returns immediately.
    /// Returns an error when the consumer stream fails or the broker closes
    /// it; the caller decides whether to start again.
    pub async fn start_consuming(&self, mut shutdown: watch::Receiver<bool>) -> BrokerResult<()> {
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| BrokerError::NoConsumer(self.name.clone()))?;

        if *shutdown.borrow() {
            return Ok(());
        }

        let channel = self.connection.channel().await?;
        let consumer_tag = format!("{}-{}", self.name, std::process::id());
        let mut deliveries = channel
            .consume(&self.name, &consumer_tag, self.prefetch)
            .await?;

        info!(queue = %self.name, consumer_tag = %consumer_tag, "rabbitmq_consumer_started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    info!(queue = %self.name, "rabbitmq_consumer_cancelled");
                    return Ok(());
                }
                delivery = deliveries.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            let requeued = self.dispatch(handler.as_ref(), delivery).await?;
                            if requeued && !self.pause_after_requeue(&mut shutdown).await {
                                return Ok(());
                            }
                        }
                        Some(Err(e)) => {
                            error!(queue = %self.name, error = %e, "rabbitmq_delivery_error");
                            return Err(e);
                        }
                        None => {
                            warn!(queue = %self.name, "rabbitmq_consumer_closed");
                            return Err(BrokerError::Closed);
                        }
                    }
                }
            }
        }
    }

    /// Wait out `requeue_delay`. Returns `false` if shutdown was requested first.
    async fn pause_after_requeue(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                info!(queue = %self.name, "rabbitmq_consumer_cancelled");
                false
            }
            _ = tokio::time::sleep(self.requeue_delay) => true,
        }
    }

    /// Run the handler for one delivery and settle it according to the outcome.
    /// Returns whether the delivery was requeued.
    async fn dispatch(
        &self,
        handler: &dyn MessageHandler,
        delivery: Delivery,
    ) -> BrokerResult<bool> {
        let delivery_tag = delivery.delivery_tag;

        info!(
            queue = %self.name,
            delivery_tag = delivery_tag,
            redelivered = delivery.redelivered,
            body_length = delivery.data.len(),
            "rabbitmq_message_received"
        );

        let outcome = match serde_json::from_slice::<Message>(&delivery.data) {
            Ok(message) => handler.handle(message).await,
            Err(e) => Err(HandlerError::permanent(format!("malformed message body: {e}"))),
        };

        match outcome {
            Ok(()) => {
                delivery.ack().await?;
                debug!(queue = %self.name, delivery_tag = delivery_tag, "rabbitmq_message_acked");
                Ok(false)
            }
            Err(HandlerError::Transient(reason)) => {
                warn!(
                    queue = %self.name,
                    delivery_tag = delivery_tag,
                    error = %reason,
                    "rabbitmq_message_requeued"
                );
                delivery.nack_requeue().await?;
                Ok(true)
            }
            Err(HandlerError::Permanent(reason)) => {
                error!(
                    queue = %self.name,
                    delivery_tag = delivery_tag,
                    error = %reason,
                    "rabbitmq_message_rejected"
                );
                delivery.reject().await?;
                Ok(false)
            }
        }
    }

    /// Release this queue's reference to the shared connection.
    ///
    /// The connection itself is closed only when no other queue holds it.
    pub async fn close(self) {
        let Queue {
            name,
            connection,
            handler,
            ..
        } = self;

        // The handler may own other queues on the same connection
        drop(handler);

        match Arc::into_inner(connection) {
            Some(connection) => connection.close().await,
            None => debug!(queue = %name, "rabbitmq_connection_still_shared"),
        }

        info!(queue = %name, "rabbitmq_queue_closed");
    }
}
