use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    error::ProcessingError,
    models::message::{NotificationMessage, QueuedNotification},
    processors::{Processor, SmsSender},
};

pub struct SmsProcessor {
    sender: Arc<dyn SmsSender>,
}

impl SmsProcessor {
    pub fn new(sender: Arc<dyn SmsSender>) -> Self {
        Self { sender }
    }

    pub fn body(notification: &NotificationMessage) -> String {
        format!(
            "Payment of Rs{} received for merchant {}",
            notification.amount, notification.merchant_id
        )
    }
}

#[async_trait]
impl Processor for SmsProcessor {
    async fn process(&self, message: &QueuedNotification) -> Result<(), ProcessingError> {
        let notification = &message.notification;
        let body = Self::body(notification);

        if let Err(e) = self.sender.send_sms(&body, &notification.mobile_number).await {
            warn!(mobile_number = %notification.mobile_number, error = %e, "SMS send failed");
            return Err(ProcessingError::Upstream(e.to_string()));
        }

        info!(mobile_number = %notification.mobile_number, unique_id = %notification.unique_id, "Sent SMS");
        Ok(())
    }
}
