//! Rental Notifier - asynchronous overdue-rental notification pipeline.
//!
//! This library provides shared modules for the two worker binaries:
//! - `rental-notification-worker`: turns rental notifications into queued emails
//! - `email-worker`: sends queued emails through Mailgun
//!
//! The [`NotificationScheduler`] runs inside the process that owns the rental
//! store and feeds the first queue.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler → book_rental_notifications → Notification Worker → events_email_queue → Email Worker → Mailgun
//! ```

pub mod config;
pub mod email;
pub mod queue;
pub mod rental;
pub mod scheduler;
pub mod telemetry;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use email::{Branding, EmailDispatchService, EmailTemplate, MailgunClient, MailgunConfig};
pub use queue::{
    BrokerConnection, OutboundEmail, Queue, RentalNotification, EMAIL_QUEUE, NOTIFICATION_QUEUE,
};
pub use scheduler::{NotificationScheduler, SchedulerConfig};
pub use worker::{OverdueNotificationHandler, WorkerRuntime};
