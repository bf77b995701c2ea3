//! Templated email: rendering, queueing and delivery.
//!
//! The producer side renders an [`EmailTemplate`] to HTML and publishes an
//! [`OutboundEmail`](crate::queue::OutboundEmail) to the email queue. The
//! consumer side hands each queued email to a [`MailTransport`].

pub mod builder;
pub mod dispatch;
pub mod mailgun;
pub mod templates;
pub mod transport;

use thiserror::Error;

pub use builder::EmailBuilder;
pub use dispatch::{EmailDispatchService, EmailSender};
pub use mailgun::{MailgunClient, MailgunConfig};
pub use templates::EmailTemplate;
pub use transport::{MailError, MailTransport};

/// Company details shown in every template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branding {
    pub company_name: String,
    pub support_email: String,
}

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("unknown email template: {0}")]
    UnknownTemplate(String),

    #[error("invalid data for template {template}: {reason}")]
    InvalidTemplateData { template: String, reason: String },
}
