use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    error::ProcessingError,
    models::message::{NotificationMessage, QueuedNotification},
    processors::{MailSender, Processor},
};

pub struct EmailProcessor {
    sender: Arc<dyn MailSender>,
}

impl EmailProcessor {
    pub fn new(sender: Arc<dyn MailSender>) -> Self {
        Self { sender }
    }

    pub fn subject(notification: &NotificationMessage) -> String {
        format!("Payment Confirmation - {}", notification.merchant_id)
    }

    pub fn body(notification: &NotificationMessage) -> String {
        format!(
            "Dear Merchant,\n\n\
             A payment of Rs{} has been received from {}.\n\
             Commission: Rs{}\n\n\
             Thank you for using our payment system.\n",
            notification.amount,
            notification.mobile_number,
            notification.commission().unwrap_or("N/A"),
        )
    }
}

#[async_trait]
impl Processor for EmailProcessor {
    async fn process(&self, message: &QueuedNotification) -> Result<(), ProcessingError> {
        let notification = &message.notification;
        let recipient = notification
            .email()
            .ok_or(ProcessingError::MissingField("properties.email"))?;

        let subject = Self::subject(notification);
        let body = Self::body(notification);

        self.sender
            .send_email(&subject, &body, recipient)
            .await
            .map_err(|e| {
                warn!(merchant_id = %notification.merchant_id, error = %e, "Email send failed");
                ProcessingError::Upstream(e.to_string())
            })?;

        info!(merchant_id = %notification.merchant_id, unique_id = %notification.unique_id, "Sent email");
        Ok(())
    }
}
