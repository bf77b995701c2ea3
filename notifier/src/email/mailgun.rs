//! Mailgun HTTP API transport.
//!
//! Sends `POST {api_base}/{domain}/messages` as a multipart form with basic
//! auth `api:<key>`. Only HTTP 200 counts as accepted.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use tracing::{error, info, warn};
use url::Url;

use super::transport::{MailError, MailTransport};
use crate::config::Config;
use crate::queue::OutboundEmail;

#[derive(Debug, Clone)]
pub struct MailgunConfig {
    pub api_key: String,
    pub domain: String,
    pub api_base: Url,
    pub timeout: Duration,
}

impl MailgunConfig {
    /// Build from application config. API key and domain are required.
    pub fn from_config(config: &Config) -> Result<Self, MailError> {
        let api_key = config
            .mailgun_api_key
            .clone()
            .ok_or_else(|| MailError::Config("MAILGUN_API_KEY is not set".to_string()))?;
        let domain = config
            .mailgun_domain
            .clone()
            .ok_or_else(|| MailError::Config("MAILGUN_DOMAIN is not set".to_string()))?;

        Ok(Self {
            api_key,
            domain,
            api_base: parse_base(&config.mailgun_api_base)?,
            timeout: config.mail_timeout(),
        })
    }
}

/// A base URL always ends with `/` so joining keeps its path.
fn parse_base(raw: &str) -> Result<Url, MailError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized)
        .map_err(|e| MailError::Config(format!("invalid MAILGUN_API_BASE {raw:?}: {e}")))
}

pub struct MailgunClient {
    http: Client,
    api_key: String,
    domain: String,
    endpoint: Url,
}

impl MailgunClient {
    pub fn new(config: MailgunConfig) -> Result<Self, MailError> {
        let endpoint = config
            .api_base
            .join(&format!("{}/messages", config.domain))
            .map_err(|e| MailError::Config(format!("invalid mailgun domain: {e}")))?;

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MailError::Config(e.to_string()))?;

        Ok(Self {
            http,
            api_key: config.api_key,
            domain: config.domain,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Text fields of the form, in send order.
    pub fn form_fields(&self, email: &OutboundEmail) -> Vec<(String, String)> {
        let from = email
            .from_email
            .clone()
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| format!("<no_reply@{}>", self.domain));

        let mut fields = vec![
            ("from".to_string(), from),
            ("to".to_string(), email.to_email.clone()),
            ("subject".to_string(), email.subject.clone()),
            ("html".to_string(), email.html_content.clone()),
        ];

        if !email.cc.is_empty() {
            fields.push(("cc".to_string(), email.cc.join(", ")));
        }
        if !email.bcc.is_empty() {
            fields.push(("bcc".to_string(), email.bcc.join(", ")));
        }
        if let Some(reply_to) = &email.reply_to {
            fields.push(("h:Reply-To".to_string(), reply_to.clone()));
        }
        for (name, value) in &email.headers {
            fields.push((format!("h:{name}"), value.clone()));
        }

        fields
    }

    fn form(&self, email: &OutboundEmail) -> Result<Form, MailError> {
        let mut form = Form::new();
        for (name, value) in self.form_fields(email) {
            form = form.text(name, value);
        }

        for attachment in &email.attachments {
            let mut part = Part::bytes(attachment.content.clone())
                .file_name(attachment.filename.clone());
            if let Some(content_type) = &attachment.content_type {
                part = part.mime_str(content_type).map_err(|e| {
                    MailError::InvalidRequest(format!(
                        "attachment {}: {e}",
                        attachment.filename
                    ))
                })?;
            }
            form = form.part("attachment", part);
        }

        Ok(form)
    }
}

#[async_trait]
impl MailTransport for MailgunClient {
    async fn send_email(&self, email: &OutboundEmail) -> Result<bool, MailError> {
        let form = self.form(email)?;

        info!(
            to = %email.to_email,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "mailgun_send_starting"
        );

        let response = self
            .http
            .post(self.endpoint.clone())
            .basic_auth("api", Some(&self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                error!(to = %email.to_email, error = %e, timeout = e.is_timeout(), "mailgun_send_error");
                MailError::Transport(e.to_string())
            })?;

        let status = response.status();
        if status == StatusCode::OK {
            info!(to = %email.to_email, status_code = status.as_u16(), "mailgun_send_complete");
            Ok(true)
        } else {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            warn!(
                to = %email.to_email,
                status_code = status.as_u16(),
                body_preview = %preview,
                "mailgun_send_rejected"
            );
            Ok(false)
        }
    }

    fn name(&self) -> &'static str {
        "mailgun"
    }
}
