use crate::config::AlertConfig;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use serde_json::{json, Value};
use std::time::Duration;

/// Outbound channel for human-readable detection alerts
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    /// Deliver one alert message
    async fn notify(&self, message: &str) -> Result<()>;
}

/// WhatsApp Cloud API notifier.
///
/// Every alert is logged; it is additionally posted to the messages
/// endpoint when both the endpoint and a token are configured.
pub struct WhatsAppNotifier {
    client: reqwest::Client,
    config: AlertConfig,
}

impl WhatsAppNotifier {
    pub fn new(config: &AlertConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build alert HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Whether alerts leave the process at all
    pub fn is_configured(&self) -> bool {
        self.config.api_url.is_some() && self.config.api_token.is_some()
    }

    /// Request body for a text message
    pub fn build_payload(&self, message: &str) -> Value {
        json!({
            "messaging_product": "whatsapp",
            "to": self.config.to_number,
            "type": "text",
            "text": { "body": message },
        })
    }
}

#[async_trait]
impl AlertNotifier for WhatsAppNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        info!("[ALERT] {}", message);

        let (url, token) = match (&self.config.api_url, &self.config.api_token) {
            (Some(url), Some(token)) => (url, token),
            _ => {
                debug!("WhatsApp delivery not configured, alert only logged");
                return Ok(());
            }
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&self.build_payload(message))
            .send()
            .await
            .map_err(|e| Error::AlertDelivery(format!("WhatsApp request failed: {}", e)))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AlertDelivery(format!(
                "WhatsApp send failed with {}: {}",
                status, body
            ))
            .into());
        }

        debug!("WhatsApp alert delivered ({})", status);
        Ok(())
    }
}
