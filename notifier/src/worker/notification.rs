//! Rental notification handling: turns each notification into a queued email.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::email::{EmailDispatchService, EmailTemplate};
use crate::queue::{
    decode_payload, HandlerError, Message, MessageHandler, OverdueNotice, RentalNotification,
};

pub struct OverdueNotificationHandler {
    email: Arc<EmailDispatchService>,
}

impl OverdueNotificationHandler {
    pub fn new(email: Arc<EmailDispatchService>) -> Self {
        Self { email }
    }

    async fn send_overdue_email(&self, notice: OverdueNotice) -> Result<(), HandlerError> {
        let Some(to_email) = notice.person_email.filter(|e| !e.is_empty()) else {
            info!(rental_id = %notice.rental_id, "notification_skipped_no_email");
            return Ok(());
        };

        let title = notice.book_title.as_deref().unwrap_or("Unknown");
        let subject = format!("Book '{title}' is overdue");
        let template = EmailTemplate::BookOverdue {
            name: notice.person_name.clone(),
            book_title: notice.book_title.clone(),
            due_date: Some(notice.due_date.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        };

        if self.email.queue_email(&to_email, &subject, &template).await {
            Ok(())
        } else {
            Err(HandlerError::transient(format!(
                "could not queue overdue email for rental {}",
                notice.rental_id
            )))
        }
    }
}

#[async_trait]
impl MessageHandler for OverdueNotificationHandler {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        match decode_payload::<RentalNotification>(message)? {
            RentalNotification::Overdue(notice) => {
                info!(
                    rental_id = %notice.rental_id,
                    has_email = notice.person_email.is_some(),
                    "notification_processing"
                );
                self.send_overdue_email(notice).await
            }
        }
    }
}
