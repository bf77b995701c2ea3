//! Long-running worker processes.
//!
//! A worker owns exactly one consumer. SIGINT or SIGTERM flips a shutdown
//! watch; the consumer finishes the message in hand, settles it and returns.
//! A consumer that drops out for any other reason (broker restart, closed
//! channel) is started again after a delay.

pub mod notification;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::email::EmailDispatchService;
use crate::queue::{BrokerError, BrokerResult, Queue};

pub use notification::OverdueNotificationHandler;

/// Default pause before restarting a consumer that lost its connection.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Something a worker can run as its single consumer.
#[async_trait]
pub trait Consumable: Send + Sync {
    fn queue_name(&self) -> &str;

    async fn start_consuming(&self, shutdown: watch::Receiver<bool>) -> BrokerResult<()>;

    async fn close(self);
}

#[async_trait]
impl Consumable for Queue {
    fn queue_name(&self) -> &str {
        self.name()
    }

    async fn start_consuming(&self, shutdown: watch::Receiver<bool>) -> BrokerResult<()> {
        Queue::start_consuming(self, shutdown).await
    }

    async fn close(self) {
        Queue::close(self).await
    }
}

#[async_trait]
impl Consumable for EmailDispatchService {
    fn queue_name(&self) -> &str {
        self.queue().name()
    }

    async fn start_consuming(&self, shutdown: watch::Receiver<bool>) -> BrokerResult<()> {
        EmailDispatchService::start_consuming(self, shutdown).await
    }

    async fn close(self) {
        EmailDispatchService::close(self).await
    }
}

pub struct WorkerRuntime<C> {
    name: &'static str,
    consumer: C,
    shutdown: watch::Sender<bool>,
    retry_delay: Duration,
}

impl<C: Consumable> WorkerRuntime<C> {
    pub fn new(name: &'static str, consumer: C) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            name,
            consumer,
            shutdown,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Sender that stops the worker when set to `true`.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Consume until a shutdown signal arrives.
    ///
    /// Returns `Ok` after a requested shutdown. A consumer with no handler is
    /// a startup error and is returned immediately.
    pub async fn start(&self) -> Result<()> {
        info!(worker = self.name, queue = %self.consumer.queue_name(), "worker_starting");

        let signals = tokio::spawn(listen_for_signals(self.shutdown.clone()));
        let result = self.consume_until_shutdown().await;
        signals.abort();

        result
    }

    async fn consume_until_shutdown(&self) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            info!(worker = self.name, "worker_ready");

            let error = match self.consumer.start_consuming(self.shutdown.subscribe()).await {
                Ok(()) => continue,
                Err(e @ BrokerError::NoConsumer(_)) => return Err(e.into()),
                Err(e) => e,
            };

            if *shutdown.borrow() {
                return Ok(());
            }

            warn!(
                worker = self.name,
                error = %error,
                retry_in_secs = self.retry_delay.as_secs_f64(),
                "worker_consumer_failed"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Signal shutdown (if not already) and close the consumer's queue.
    pub async fn stop(self) {
        info!(worker = self.name, "worker_stopping");

        self.shutdown.send_replace(true);
        self.consumer.close().await;

        info!(worker = self.name, "worker_shutdown_complete");
    }
}

async fn listen_for_signals(shutdown: watch::Sender<bool>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    if shutdown.send(true).is_err() {
        error!("worker_shutdown_receiver_gone");
    }
}
