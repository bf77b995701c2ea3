//! The closed set of email templates.
//!
//! Each variant carries its own data. Every field is optional: a missing
//! value renders a placeholder ("there", "Unknown", "#") so rendering never
//! fails on partial data. Numbers and booleans are accepted as text.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{Branding, EmailBuilder, EmailError};

/// A named template with its data, tagged on the wire as
/// `{template_name, template_data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "template_name", content = "template_data", rename_all = "snake_case")]
pub enum EmailTemplate {
    Welcome {
        #[serde(default, deserialize_with = "lenient_string")]
        name: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        verification_url: Option<String>,
    },
    VerificationCode {
        #[serde(default, deserialize_with = "lenient_string")]
        name: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        code: Option<String>,
    },
    ResetPassword {
        #[serde(default, deserialize_with = "lenient_string")]
        name: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        reset_url: Option<String>,
    },
    PasswordChanged {
        #[serde(default, deserialize_with = "lenient_string")]
        name: Option<String>,
    },
    AccountDeactivated {
        #[serde(default, deserialize_with = "lenient_string")]
        name: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        reactivation_url: Option<String>,
    },
    AccountLocked {
        #[serde(default, deserialize_with = "lenient_string")]
        name: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        unlock_url: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        timestamp: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        location: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        ip_address: Option<String>,
    },
    LoginNotification {
        #[serde(default, deserialize_with = "lenient_string")]
        name: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        timestamp: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        device: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        location: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        ip_address: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        secure_url: Option<String>,
    },
    EmailChanged {
        #[serde(default, deserialize_with = "lenient_string")]
        name: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        old_email: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        new_email: Option<String>,
    },
    EventRegistration {
        #[serde(default, deserialize_with = "lenient_string")]
        event_title: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        event_date: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        event_description: Option<String>,
    },
    BookOverdue {
        #[serde(default, deserialize_with = "lenient_string")]
        name: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        book_title: Option<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        due_date: Option<String>,
    },
}

impl EmailTemplate {
    /// Wire names of every template, in declaration order.
    pub const NAMES: [&'static str; 10] = [
        "welcome",
        "verification_code",
        "reset_password",
        "password_changed",
        "account_deactivated",
        "account_locked",
        "login_notification",
        "email_changed",
        "event_registration",
        "book_overdue",
    ];

    /// Resolve a template by name from loosely-typed data.
    ///
    /// Unknown names fail with [`EmailError::UnknownTemplate`]. A `null`
    /// payload is treated as empty data.
    pub fn from_parts(name: &str, data: Value) -> Result<Self, EmailError> {
        if !Self::NAMES.contains(&name) {
            return Err(EmailError::UnknownTemplate(name.to_string()));
        }

        let data = match data {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        let tagged = serde_json::json!({ "template_name": name, "template_data": data });
        serde_json::from_value(tagged).map_err(|e| EmailError::InvalidTemplateData {
            template: name.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::VerificationCode { .. } => "verification_code",
            Self::ResetPassword { .. } => "reset_password",
            Self::PasswordChanged { .. } => "password_changed",
            Self::AccountDeactivated { .. } => "account_deactivated",
            Self::AccountLocked { .. } => "account_locked",
            Self::LoginNotification { .. } => "login_notification",
            Self::EmailChanged { .. } => "email_changed",
            Self::EventRegistration { .. } => "event_registration",
            Self::BookOverdue { .. } => "book_overdue",
        }
    }

    /// Render the full HTML document.
    pub fn render(&self, branding: &Branding) -> String {
        let company = branding.company_name.as_str();
        let support = branding.support_email.as_str();
        let footer = format!("© 2025 {company}");
        let contact = format!("Contact support: {support}");
        let mailto = format!("mailto:{support}");
        let builder = EmailBuilder::new();

        match self {
            Self::Welcome {
                name,
                verification_url,
            } => builder
                .header(&format!("Welcome to {company}!"))
                .text(&format!("Hello {}!", or(name, "there")))
                .text("Thank you for joining us.")
                .text("To get started, please verify your email address by clicking the button below:")
                .button("Verify Email", or(verification_url, "#"))
                .text("If you didn't create this account, please ignore this email.")
                .footer(&footer)
                .build(),

            Self::VerificationCode { name, code } => builder
                .header("Verify Your Email")
                .text(&format!("Hello {},", or(name, "there")))
                .text("Please use the following code to verify your email address:")
                .bold(or(code, ""))
                .text("This code will expire in 30 minutes.")
                .text("If you didn't request this code, please ignore this email.")
                .footer(&footer)
                .build(),

            Self::ResetPassword { name, reset_url } => builder
                .header("Password Reset Request")
                .text(&format!("Hello {},", or(name, "there")))
                .text("We received a request to reset your password.")
                .text("Click the button below to create a new password:")
                .button("Reset Password", or(reset_url, "#"))
                .text("This link will expire in 60 minutes.")
                .text("If you didn't request this change, please contact our support team immediately.")
                .divider()
                .text(&contact)
                .footer(&footer)
                .build(),

            Self::PasswordChanged { name } => builder
                .header("Password Changed Successfully")
                .text(&format!("Hello {},", or(name, "there")))
                .text("Your password has been changed successfully.")
                .text("If you did not make this change, please contact our support team immediately:")
                .link(support, &mailto)
                .divider()
                .text("For your security, we recommend:")
                .list(
                    [
                        "Using a strong, unique password",
                        "Enabling two-factor authentication if available",
                        "Never sharing your password with others",
                    ],
                    false,
                )
                .footer(&footer)
                .build(),

            Self::AccountDeactivated {
                name,
                reactivation_url,
            } => builder
                .header("Account Deactivated")
                .text(&format!("Hello {},", or(name, "there")))
                .text("Your account has been deactivated as requested.")
                .text("If you'd like to reactivate your account, you can do so by clicking the button below:")
                .button("Reactivate Account", or(reactivation_url, "#"))
                .text("If you did not request this change, please contact our support team immediately.")
                .divider()
                .text(&contact)
                .footer(&footer)
                .build(),

            Self::AccountLocked {
                name,
                unlock_url,
                timestamp,
                location,
                ip_address,
            } => builder
                .header("Account Security Alert")
                .text(&format!("Hello {},", or(name, "there")))
                .text("We detected unusual activity on your account and have temporarily locked it for your security.")
                .text("To unlock your account, please click the button below:")
                .button("Unlock Account", or(unlock_url, "#"))
                .divider()
                .text("Recent activity detected:")
                .list(
                    [
                        format!("Time: {}", or(timestamp, "Unknown")),
                        format!("Location: {}", or(location, "Unknown")),
                        format!("IP Address: {}", or(ip_address, "Unknown")),
                    ],
                    false,
                )
                .text("If this was you, you can safely unlock your account. If not, please contact support immediately.")
                .divider()
                .text(&contact)
                .footer(&footer)
                .build(),

            Self::LoginNotification {
                name,
                timestamp,
                device,
                location,
                ip_address,
                secure_url,
            } => builder
                .header("New Login Detected")
                .text(&format!("Hello {},", or(name, "there")))
                .text("We detected a new login to your account from an unrecognized device:")
                .list(
                    [
                        format!("Time: {}", or(timestamp, "Unknown")),
                        format!("Device: {}", or(device, "Unknown")),
                        format!("Location: {}", or(location, "Unknown")),
                        format!("IP Address: {}", or(ip_address, "Unknown")),
                    ],
                    false,
                )
                .text("If this wasn't you, please secure your account immediately:")
                .button("Secure Account", or(secure_url, "#"))
                .footer(&footer)
                .build(),

            Self::EmailChanged {
                name,
                old_email,
                new_email,
            } => builder
                .header("Email Address Changed")
                .text(&format!("Hello {},", or(name, "there")))
                .text("Your email address has been changed successfully.")
                .text(&format!("Old email: {}", or(old_email, "Unknown")))
                .text(&format!("New email: {}", or(new_email, "Unknown")))
                .text("If you did not make this change, please contact our support team immediately:")
                .link(support, &mailto)
                .footer(&footer)
                .build(),

            Self::EventRegistration {
                event_title,
                event_date,
                event_description,
            } => builder
                .header("Event Registration Confirmed")
                .text("Hello there!")
                .text(&format!(
                    "Your registration for the event '{}' has been confirmed!",
                    or(event_title, "Unknown Event")
                ))
                .text("Event details:")
                .list(
                    [
                        format!("Title: {}", or(event_title, "Unknown")),
                        format!("Date: {}", or(event_date, "Unknown")),
                        format!(
                            "Description: {}",
                            or(event_description, "No description available")
                        ),
                    ],
                    false,
                )
                .text("We look forward to seeing you at the event!")
                .text("If you have any questions, please contact our support team.")
                .divider()
                .text(&contact)
                .footer(&footer)
                .build(),

            Self::BookOverdue {
                name,
                book_title,
                due_date,
            } => builder
                .header("Book Overdue Notice")
                .text(&format!("Hello {},", or(name, "there")))
                .text(&format!(
                    "The book '{}' you rented was due on {}.",
                    or(book_title, "Unknown"),
                    or(due_date, "Unknown")
                ))
                .text("Please return it as soon as possible.")
                .text("If you have already returned this book, please ignore this email.")
                .divider()
                .text(&contact)
                .footer(&footer)
                .build(),
        }
    }
}

/// Accept any JSON value as template text; `null` means absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

fn or<'a>(value: &'a Option<String>, fallback: &'a str) -> &'a str {
    value.as_deref().unwrap_or(fallback)
}
