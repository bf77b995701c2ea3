//! Rental Notification Worker.
//!
//! This binary:
//! 1. Consumes overdue notifications from the book_rental_notifications queue
//! 2. Renders a book_overdue email for each one
//! 3. Publishes it to the events_email_queue for the email worker
//!
//! Both queues share one broker connection.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use rental_notifier::{
    telemetry, BrokerConnection, Config, EmailDispatchService, OverdueNotificationHandler, Queue,
    WorkerRuntime,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init();

    info!("notification_worker_starting");

    let config = Config::from_env();
    info!(
        notification_queue = %config.notification_queue,
        email_queue = %config.email_queue,
        prefetch = config.consumer_prefetch,
        requeue_delay_ms = config.consumer_requeue_delay_ms,
        "config_loaded"
    );

    let connection = Arc::new(BrokerConnection::amqp(config.rabbitmq_url.clone()));

    let email_queue = Queue::declare(Arc::clone(&connection), config.email_queue.clone())
        .await
        .context("Failed to declare email queue")?;
    let email = Arc::new(EmailDispatchService::new(
        email_queue,
        config.branding(),
        config.from_email(),
    ));

    let mut notifications = Queue::declare(connection, config.notification_queue.clone())
        .await
        .context("Failed to declare notification queue")?
        .with_prefetch(config.consumer_prefetch)
        .with_requeue_delay(config.consumer_requeue_delay());
    notifications.set_consumer(Arc::new(OverdueNotificationHandler::new(email)));

    let runtime = WorkerRuntime::new("notification_worker", notifications)
        .with_retry_delay(config.consumer_retry_delay());

    let result = runtime.start().await;
    runtime.stop().await;

    result
}
