use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::{models::retry::RetryConfig, processors::SmsSender, utils::retry_with_backoff};

/// Client for a Twilio-compatible messaging REST API.
pub struct SmsClient {
    http_client: Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
    from: String,
    country_code: String,
    retry_config: RetryConfig,
}

pub struct SmsClientSettings {
    pub base_url: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from: String,
    pub country_code: String,
}

impl SmsClient {
    pub fn new(settings: SmsClientSettings, retry_config: RetryConfig) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(base_url = %settings.base_url, "SMS client initialized");

        Ok(Self {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            account_sid: settings.account_sid,
            auth_token: settings.auth_token,
            from: settings.from,
            country_code: settings.country_code,
            retry_config,
        })
    }

    /// Prefixes local numbers with the configured country code.
    pub fn international_number(&self, mobile_number: &str) -> String {
        if mobile_number.starts_with('+') {
            mobile_number.to_string()
        } else {
            format!("{}{}", self.country_code, mobile_number)
        }
    }

    async fn send_once(&self, body: &str, to: &str) -> Result<(), Error> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        );

        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("From", self.from.as_str()), ("To", to), ("Body", body)])
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            Err(anyhow!("SMS gateway returned {}: {}", status, error_text))
        }
    }
}

#[async_trait]
impl SmsSender for SmsClient {
    async fn send_sms(&self, body: &str, recipient: &str) -> Result<()> {
        let to = self.international_number(recipient);
        debug!(to = %to, "Sending SMS");

        retry_with_backoff(&self.retry_config, "sms_send", || self.send_once(body, &to)).await
    }
}
