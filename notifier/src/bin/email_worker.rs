//! Email Worker - sends queued emails through Mailgun.
//!
//! Consumes the events_email_queue one message at a time. An email Mailgun
//! accepts is acknowledged; anything else is requeued for another attempt.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use rental_notifier::{
    telemetry, BrokerConnection, Config, EmailDispatchService, MailgunClient, MailgunConfig,
    Queue, WorkerRuntime,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init();

    info!("email_worker_starting");

    let config = Config::from_env();
    let mailgun = MailgunConfig::from_config(&config).context("Mailgun is not configured")?;
    info!(
        email_queue = %config.email_queue,
        mailgun_domain = %mailgun.domain,
        mailgun_api_base = %mailgun.api_base,
        prefetch = config.consumer_prefetch,
        requeue_delay_ms = config.consumer_requeue_delay_ms,
        "config_loaded"
    );

    let transport = MailgunClient::new(mailgun).context("Failed to build Mailgun client")?;

    let connection = Arc::new(BrokerConnection::amqp(config.rabbitmq_url.clone()));
    let queue = Queue::declare(connection, config.email_queue.clone())
        .await
        .context("Failed to declare email queue")?
        .with_prefetch(config.consumer_prefetch)
        .with_requeue_delay(config.consumer_requeue_delay());

    let mut service = EmailDispatchService::new(queue, config.branding(), config.from_email());
    service.attach_transport(Arc::new(transport));

    let runtime = WorkerRuntime::new("email_worker", service)
        .with_retry_delay(config.consumer_retry_delay());

    let result = runtime.start().await;
    runtime.stop().await;

    result
}
