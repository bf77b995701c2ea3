//! Process-wide broker connection.
//!
//! One `BrokerConnection` is built per process and shared (`Arc`) by every
//! [`Queue`](super::Queue). It holds at most one live channel and reconnects
//! lazily: a dead connection is only replaced when someone next asks for the
//! channel. Connect failures go back to that caller; there is no background
//! reconnect loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::{AmqpConnector, BrokerResult, Channel, Connector};

/// Observable state of a [`BrokerConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Shared connection manager with lazy, single-flight reconnect.
pub struct BrokerConnection {
    connector: Box<dyn Connector>,
    channel: RwLock<Option<Arc<dyn Channel>>>,
    connect_lock: Mutex<()>,
    connecting: AtomicBool,
}

impl BrokerConnection {
    /// Create a connection manager. Nothing is opened until first use.
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            channel: RwLock::new(None),
            connect_lock: Mutex::new(()),
            connecting: AtomicBool::new(false),
        }
    }

    /// Connection manager for a RabbitMQ URL.
    pub fn amqp(url: impl Into<String>) -> Self {
        Self::new(AmqpConnector::new(url))
    }

    /// Return the live channel, reconnecting first if the connection is gone.
    ///
    /// Concurrent callers racing on a dead connection share one reconnect:
    /// exactly one physical connection is opened.
    pub async fn channel(&self) -> BrokerResult<Arc<dyn Channel>> {
        if let Some(channel) = self.live_channel().await {
            return Ok(channel);
        }

        let _guard = self.connect_lock.lock().await;

        // Double-check: another caller may have connected while we waited
        if let Some(channel) = self.live_channel().await {
            return Ok(channel);
        }

        let channel = {
            let _connecting = ConnectingFlag::raise(&self.connecting);
            self.connector.connect().await?
        };
        *self.channel.write().await = Some(Arc::clone(&channel));

        info!("rabbitmq_connection_ready");

        Ok(channel)
    }

    /// Whether a live channel is currently held. Never connects.
    pub async fn is_connected(&self) -> bool {
        self.live_channel().await.is_some()
    }

    pub async fn state(&self) -> ConnectionState {
        if self.connecting.load(Ordering::SeqCst) {
            ConnectionState::Connecting
        } else if self.is_connected().await {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Close the connection. Calling it again, or on a connection that was
    /// never opened, does nothing.
    pub async fn close(&self) {
        let channel = self.channel.write().await.take();

        match channel {
            Some(channel) if channel.is_open() => {
                if let Err(e) = channel.close().await {
                    warn!(error = %e, "rabbitmq_connection_close_error");
                }
                info!("rabbitmq_connection_closed");
            }
            _ => {}
        }
    }

    async fn live_channel(&self) -> Option<Arc<dyn Channel>> {
        self.channel
            .read()
            .await
            .as_ref()
            .filter(|channel| channel.is_open())
            .cloned()
    }
}

/// Holds `connecting` raised until dropped, including when the connect
/// future is cancelled.
struct ConnectingFlag<'a>(&'a AtomicBool);

impl<'a> ConnectingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ConnectingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
