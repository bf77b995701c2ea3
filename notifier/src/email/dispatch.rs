//! Email queue service.
//!
//! Producers call [`EmailDispatchService::queue_email`], which renders the
//! template and publishes the result. The email worker attaches a transport
//! and consumes the same queue, sending each email through it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{Branding, EmailError, EmailTemplate, MailTransport};
use crate::queue::{
    decode_payload, BrokerResult, HandlerError, Message, MessageHandler, OutboundEmail, Queue,
};

pub struct EmailDispatchService {
    queue: Queue,
    branding: Branding,
    from_email: String,
}

impl EmailDispatchService {
    pub fn new(queue: Queue, branding: Branding, from_email: impl Into<String>) -> Self {
        Self {
            queue,
            branding,
            from_email: from_email.into(),
        }
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Render a template into the message published on the email queue.
    pub fn compose(&self, to_email: &str, subject: &str, template: &EmailTemplate) -> OutboundEmail {
        OutboundEmail {
            to_email: to_email.to_string(),
            subject: subject.to_string(),
            html_content: template.render(&self.branding),
            from_email: Some(self.from_email.clone()),
            ..Default::default()
        }
    }

    /// Render and publish one email.
    ///
    /// Returns `false` when the publish fails. The failure is logged, not
    /// propagated.
    pub async fn queue_email(&self, to_email: &str, subject: &str, template: &EmailTemplate) -> bool {
        let email = self.compose(to_email, subject, template);

        match self.queue.publish(&email).await {
            Ok(()) => {
                info!(
                    to = %to_email,
                    template = template.name(),
                    queue = %self.queue.name(),
                    "email_queued"
                );
                true
            }
            Err(e) => {
                error!(
                    to = %to_email,
                    template = template.name(),
                    error = %e,
                    "email_queue_failed"
                );
                false
            }
        }
    }

    /// [`queue_email`](Self::queue_email) for a template named at runtime.
    ///
    /// An unknown name or malformed data fails before anything is published.
    pub async fn queue_named_email(
        &self,
        to_email: &str,
        subject: &str,
        template_name: &str,
        template_data: Value,
    ) -> Result<bool, EmailError> {
        let template = EmailTemplate::from_parts(template_name, template_data)?;
        Ok(self.queue_email(to_email, subject, &template).await)
    }

    /// Send every consumed email through `transport`.
    pub fn attach_transport(&mut self, transport: Arc<dyn MailTransport>) {
        self.queue.set_consumer(Arc::new(EmailSender::new(transport)));
    }

    pub async fn start_consuming(&self, shutdown: watch::Receiver<bool>) -> BrokerResult<()> {
        self.queue.start_consuming(shutdown).await
    }

    pub async fn close(self) {
        self.queue.close().await;
    }
}

/// Handler that delivers queued emails through a [`MailTransport`].
pub struct EmailSender {
    transport: Arc<dyn MailTransport>,
}

impl EmailSender {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl MessageHandler for EmailSender {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        let email: OutboundEmail = decode_payload(message)?;

        info!(
            to = %email.to_email,
            subject = %email.subject,
            transport = self.transport.name(),
            "email_processing"
        );

        match self.transport.send_email(&email).await {
            Ok(true) => {
                info!(to = %email.to_email, "email_sent");
                Ok(())
            }
            Ok(false) => {
                warn!(to = %email.to_email, "email_rejected_by_transport");
                Err(HandlerError::transient(format!(
                    "{} did not accept email to {}",
                    self.transport.name(),
                    email.to_email
                )))
            }
            Err(e) => Err(HandlerError::transient(e)),
        }
    }
}
