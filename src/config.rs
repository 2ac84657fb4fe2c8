use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    auth::ApiCredentials,
    dispatch::BatchSettings,
    models::{
        channel::{Channel, FailurePolicy},
        retry::RetryConfig,
    },
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    #[serde(default = "default_forward_queue")]
    pub forward_queue_name: String,
    #[serde(default = "default_email_queue")]
    pub email_queue_name: String,
    #[serde(default = "default_sms_queue")]
    pub sms_queue_name: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout_seconds")]
    pub batch_timeout_seconds: u64,
    #[serde(default = "default_reconnect_delay_seconds")]
    pub reconnect_delay_seconds: u64,

    #[serde(default = "default_requeue")]
    pub forward_failure_policy: FailurePolicy,
    #[serde(default = "default_acknowledge")]
    pub email_failure_policy: FailurePolicy,
    #[serde(default = "default_acknowledge")]
    pub sms_failure_policy: FailurePolicy,

    /// Comma separated channels whose consumers run in this process.
    #[serde(default = "default_enabled_channels")]
    pub enabled_channels: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    pub api_key: String,
    pub api_secret: String,

    pub database_url: String,

    pub redis_url: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    pub ipn_url: String,
    pub ipn_subscription_key: String,

    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub email_from: String,

    pub sms_api_url: String,
    pub sms_account_sid: String,
    pub sms_auth_token: String,
    pub sms_from: String,
    #[serde(default = "default_sms_country_code")]
    pub sms_country_code: String,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,
}

fn default_forward_queue() -> String {
    "forward_queue".to_string()
}

fn default_email_queue() -> String {
    "email_queue".to_string()
}

fn default_sms_queue() -> String {
    "sms_queue".to_string()
}

fn default_prefetch_count() -> u16 {
    100
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_seconds() -> u64 {
    10
}

fn default_reconnect_delay_seconds() -> u64 {
    5
}

fn default_requeue() -> FailurePolicy {
    FailurePolicy::Requeue
}

fn default_acknowledge() -> FailurePolicy {
    FailurePolicy::Acknowledge
}

fn default_enabled_channels() -> String {
    "forward,email,sms".to_string()
}

fn default_server_port() -> u16 {
    8000
}

fn default_history_limit() -> usize {
    5
}

fn default_smtp_port() -> u16 {
    587
}

fn default_sms_country_code() -> String {
    "+977".to_string()
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    200
}

fn default_max_retry_delay_ms() -> u64 {
    2000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the cross-field rules envy cannot express.
    pub fn validate(&self) -> Result<(), Error> {
        if self.batch_size == 0 {
            return Err(anyhow!("BATCH_SIZE must be at least 1"));
        }
        if self.batch_timeout_seconds == 0 {
            return Err(anyhow!("BATCH_TIMEOUT_SECONDS must be at least 1"));
        }
        if self.history_limit == 0 {
            return Err(anyhow!("HISTORY_LIMIT must be at least 1"));
        }
        self.enabled_channels()?;
        Ok(())
    }

    pub fn credentials(&self) -> ApiCredentials {
        ApiCredentials::new(self.api_key.clone(), self.api_secret.clone())
    }

    pub fn channel_queues(&self) -> ChannelQueues {
        ChannelQueues {
            forward: self.forward_queue_name.clone(),
            email: self.email_queue_name.clone(),
            sms: self.sms_queue_name.clone(),
        }
    }

    pub fn failure_policy(&self, channel: Channel) -> FailurePolicy {
        match channel {
            Channel::Forward => self.forward_failure_policy,
            Channel::Email => self.email_failure_policy,
            Channel::Sms => self.sms_failure_policy,
        }
    }

    pub fn enabled_channels(&self) -> Result<Vec<Channel>, Error> {
        let mut channels = Vec::new();

        for name in self.enabled_channels.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let channel = match name.to_ascii_lowercase().as_str() {
                "forward" | "ipn" => Channel::Forward,
                "email" => Channel::Email,
                "sms" => Channel::Sms,
                other => return Err(anyhow!("Unknown channel in ENABLED_CHANNELS: {}", other)),
            };
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }

        Ok(channels)
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            size: self.batch_size,
            timeout: Duration::from_secs(self.batch_timeout_seconds),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }
}

/// Queue name per channel, fixed at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelQueues {
    pub forward: String,
    pub email: String,
    pub sms: String,
}

impl ChannelQueues {
    pub fn name(&self, channel: Channel) -> &str {
        match channel {
            Channel::Forward => &self.forward,
            Channel::Email => &self.email,
            Channel::Sms => &self.sms,
        }
    }

    pub fn all(&self) -> Vec<String> {
        vec![self.forward.clone(), self.email.clone(), self.sms.clone()]
    }
}

impl Default for ChannelQueues {
    fn default() -> Self {
        Self {
            forward: default_forward_queue(),
            email: default_email_queue(),
            sms: default_sms_queue(),
        }
    }
}
