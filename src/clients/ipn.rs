use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    models::{
        ipn::{IpnRequest, IpnResponse},
        retry::RetryConfig,
        validation::parse_amount,
    },
    processors::IpnForwarder,
    utils::retry_with_backoff,
};

pub struct IpnClient {
    http_client: Client,
    url: String,
    subscription_key: String,
    retry_config: RetryConfig,
}

impl IpnClient {
    pub fn new(
        url: impl Into<String>,
        subscription_key: impl Into<String>,
        retry_config: RetryConfig,
    ) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        let url = url.into();
        info!(url = %url, "IPN client initialized");

        Ok(Self {
            http_client,
            url,
            subscription_key: subscription_key.into(),
            retry_config,
        })
    }

    async fn send_once(&self, request: &IpnRequest) -> Result<IpnResponse, Error> {
        let response = self
            .http_client
            .post(&self.url)
            .header("Subscription-Key", &self.subscription_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("IPN request failed with {}: {}", status, error_text));
        }

        response
            .json::<IpnResponse>()
            .await
            .map_err(|e| anyhow!("Invalid IPN response body: {}", e))
    }
}

#[async_trait]
impl IpnForwarder for IpnClient {
    async fn forward(&self, amount: &str, machine_identifier: &str) -> Result<IpnResponse> {
        let amount = parse_amount(amount).map_err(|e| anyhow!("Amount {:?} {}", amount, e))?;

        let request = IpnRequest {
            amount,
            machine_identifier: machine_identifier.to_string(),
        };

        debug!(machine_identifier, amount = %amount, "Forwarding payment to IPN partner");

        retry_with_backoff(&self.retry_config, "ipn_forward", || self.send_once(&request)).await
    }
}
