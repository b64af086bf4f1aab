//! HTTP transport for tenant webhooks.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;

use crate::error::DeliveryError;

/// One webhook POST. Implementations classify failures so the fan-out can
/// tell a dead gateway from a transient hiccup.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn deliver(
        &self,
        url: &str,
        auth: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DeliveryError>;
}

pub struct HttpWebhookTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpWebhookTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookTransport {
    async fn deliver(
        &self,
        url: &str,
        auth: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DeliveryError> {
        let request = self
            .client
            .post(url)
            .header(AUTHORIZATION, auth)
            .json(payload)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| DeliveryError::Timeout {
                url: url.to_string(),
            })?
            .map_err(|e| DeliveryError::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(DeliveryError::BadStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}
