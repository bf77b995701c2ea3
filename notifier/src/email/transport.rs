//! Outbound mail transport seam.

use async_trait::async_trait;
use thiserror::Error;

use crate::queue::OutboundEmail;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport misconfigured: {0}")]
    Config(String),

    #[error("invalid mail request: {0}")]
    InvalidRequest(String),

    #[error("mail transport request failed: {0}")]
    Transport(String),
}

/// Trait for outbound mail providers.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Send one email.
    ///
    /// `Ok(false)` means the provider refused the message; `Err` means the
    /// request could not be completed. Both are delivery failures.
    async fn send_email(&self, email: &OutboundEmail) -> Result<bool, MailError>;

    /// Get provider name
    fn name(&self) -> &'static str;
}
