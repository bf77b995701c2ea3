//! AMQP transport built on lapin.
//!
//! Every connection carries exactly one channel, in publisher-confirm mode,
//! so a publish only succeeds once the broker has taken the message.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker as LapinAcker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Connection, ConnectionProperties,
};
use tracing::{info, warn};

use super::{Acker, BrokerError, BrokerResult, Channel, Connector, Deliveries, Delivery};

/// Persistent delivery mode: the message survives a broker restart.
const PERSISTENT: u8 = 2;

/// Connects to RabbitMQ through an AMQP URL.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    url: String,
}

impl AmqpConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self) -> BrokerResult<Arc<dyn Channel>> {
        info!(url_length = self.url.len(), "rabbitmq_connecting");

        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        info!("rabbitmq_connected");

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))?;

        info!(channel_id = channel.id(), "rabbitmq_channel_created");

        Ok(Arc::new(AmqpChannel {
            connection,
            channel,
        }))
    }
}

/// A lapin connection together with its single channel.
struct AmqpChannel {
    connection: Connection,
    channel: lapin::Channel,
}

#[async_trait]
impl Channel for AmqpChannel {
    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn declare_queue(&self, queue: &str) -> BrokerResult<()> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Declare {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> BrokerResult<()> {
        let publish_error = |e: lapin::Error| BrokerError::Publish {
            queue: queue.to_string(),
            reason: e.to_string(),
        };

        let confirmation = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;

        if confirmation.is_nack() {
            return Err(BrokerError::Publish {
                queue: queue.to_string(),
                reason: "broker refused the message".to_string(),
            });
        }

        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> BrokerResult<Deliveries> {
        let consume_error = |e: lapin::Error| BrokerError::Consume {
            queue: queue.to_string(),
            reason: e.to_string(),
        };

        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(consume_error)?;

        info!(queue = queue, prefetch_count = prefetch, "rabbitmq_qos_set");

        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(consume_error)?;

        let queue = queue.to_string();
        let deliveries = consumer.map(move |item| match item {
            Ok(delivery) => Ok(Delivery::new(
                delivery.delivery_tag,
                delivery.redelivered,
                delivery.data,
                Box::new(AmqpAcker {
                    acker: delivery.acker,
                    delivery_tag: delivery.delivery_tag,
                }),
            )),
            Err(e) => Err(BrokerError::Consume {
                queue: queue.clone(),
                reason: e.to_string(),
            }),
        });

        Ok(deliveries.boxed())
    }

    async fn close(&self) -> BrokerResult<()> {
        if let Err(e) = self.channel.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_channel_close_error");
        }

        if let Err(e) = self.connection.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_connection_close_error");
        }

        Ok(())
    }
}

struct AmqpAcker {
    acker: LapinAcker,
    delivery_tag: u64,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(&self) -> BrokerResult<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::Settle {
                delivery_tag: self.delivery_tag,
                reason: e.to_string(),
            })
    }

    async fn nack(&self, requeue: bool) -> BrokerResult<()> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::Settle {
                delivery_tag: self.delivery_tag,
                reason: e.to_string(),
            })
    }
}
