//! Queue message types for the two-queue pipeline.
//!
//! This module defines the message formats for:
//! - `book_rental_notifications` queue: rental events from the scheduler
//! - `events_email_queue` queue: rendered emails ready for the mail transport

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Default queue name for rental notifications.
pub const NOTIFICATION_QUEUE: &str = "book_rental_notifications";

/// Default queue name for outbound emails.
pub const EMAIL_QUEUE: &str = "events_email_queue";

// =============================================================================
// Rental Notifications (book_rental_notifications queue)
// =============================================================================

/// A rental event, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RentalNotification {
    Overdue(OverdueNotice),
}

/// Context for an overdue rental.
///
/// Display fields are absent when the book or person could not be found.
/// Datetimes are ISO-8601 without offset, e.g. `2024-01-01T00:00:00`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverdueNotice {
    pub rental_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_email: Option<String>,
    pub due_date: NaiveDateTime,
    pub rental_date: NaiveDateTime,
    pub timestamp: NaiveDateTime,
}

// =============================================================================
// Outbound Emails (events_email_queue queue)
// =============================================================================

/// A rendered email waiting for the mail transport.
///
/// Optional fields are omitted from the wire when empty, so the common
/// message is exactly `{to_email, subject, html_content, from_email}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to_email: String,
    pub subject: String,
    pub html_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_email: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Extra MIME headers, sent as `h:<name>`.
    #[serde(default, alias = "custom_headers", skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// A file attached to an outbound email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}
