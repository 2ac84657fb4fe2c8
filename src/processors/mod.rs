//! Per-channel business actions, invoked once per message of a flushed batch.

pub mod email;
pub mod forward;
pub mod sms;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    error::ProcessingError,
    models::{channel::Channel, ipn::IpnResponse, message::QueuedNotification},
};

pub use email::EmailProcessor;
pub use forward::ForwardProcessor;
pub use sms::SmsProcessor;

#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, message: &QueuedNotification) -> Result<(), ProcessingError>;
}

/// IPN partner that receives forwarded payments.
#[async_trait]
pub trait IpnForwarder: Send + Sync {
    async fn forward(&self, amount: &str, machine_identifier: &str) -> Result<IpnResponse>;
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send_email(&self, subject: &str, body: &str, recipient: &str) -> Result<()>;
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, body: &str, recipient: &str) -> Result<()>;
}

/// Fixed channel-to-processor mapping built once at startup.
#[derive(Clone)]
pub struct ProcessorRegistry {
    forward: Arc<dyn Processor>,
    email: Arc<dyn Processor>,
    sms: Arc<dyn Processor>,
}

impl ProcessorRegistry {
    pub fn new(
        forward: Arc<dyn Processor>,
        email: Arc<dyn Processor>,
        sms: Arc<dyn Processor>,
    ) -> Self {
        Self {
            forward,
            email,
            sms,
        }
    }

    pub fn for_channel(&self, channel: Channel) -> Arc<dyn Processor> {
        match channel {
            Channel::Forward => Arc::clone(&self.forward),
            Channel::Email => Arc::clone(&self.email),
            Channel::Sms => Arc::clone(&self.sms),
        }
    }
}
