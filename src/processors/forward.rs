use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    error::ProcessingError,
    models::message::QueuedNotification,
    processors::{IpnForwarder, Processor},
};

/// Re-sends the settled amount to the IPN partner for the paying terminal.
pub struct ForwardProcessor {
    forwarder: Arc<dyn IpnForwarder>,
}

impl ForwardProcessor {
    pub fn new(forwarder: Arc<dyn IpnForwarder>) -> Self {
        Self { forwarder }
    }
}

#[async_trait]
impl Processor for ForwardProcessor {
    async fn process(&self, message: &QueuedNotification) -> Result<(), ProcessingError> {
        let notification = &message.notification;
        let machine_identifier = message
            .machine_identifier
            .as_deref()
            .ok_or(ProcessingError::MissingField("machineIdentifier"))?;

        match self
            .forwarder
            .forward(&notification.amount, machine_identifier)
            .await
        {
            Ok(response) => {
                info!(
                    unique_id = %notification.unique_id,
                    amount = %notification.amount,
                    machine_identifier,
                    response_code = %response.response_code,
                    response_message = %response.message,
                    "Payment forwarded to IPN partner"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    unique_id = %notification.unique_id,
                    machine_identifier,
                    error = %e,
                    "IPN forwarding failed"
                );
                Err(ProcessingError::Upstream(e.to_string()))
            }
        }
    }
}
