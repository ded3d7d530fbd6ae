use crate::config::ChatConfig;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Large-language-model backend answering free-text queries
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Display name used in degraded replies
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Google Gemini `generateContent` client
pub struct GeminiClient {
    client: reqwest::Client,
    config: ChatConfig,
}

impl GeminiClient {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build chat HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

/// Concatenated text parts of the first candidate
pub fn extract_reply(response: &Value) -> Option<String> {
    let parts = response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl ChatProvider for GeminiClient {
    fn name(&self) -> &str {
        "Gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| Error::ChatProvider("GEMINI_API_KEY is not configured".to_string()))?;

        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ChatProvider(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::ChatProvider(format!(
                "{} returned {}: {}",
                self.config.model, status, text
            ))
            .into());
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::ChatProvider(format!("Invalid response body: {}", e)))?;

        extract_reply(&payload)
            .ok_or_else(|| Error::ChatProvider("Response contained no text".to_string()).into())
    }
}

/// Front for the chat provider; failures become reply text instead of errors
#[derive(Clone)]
pub struct ChatRelay {
    provider: Arc<dyn ChatProvider>,
}

impl ChatRelay {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    pub async fn reply(&self, text: &str) -> String {
        debug!(
            "Forwarding chat query ({} chars) to {}",
            text.len(),
            self.provider.name()
        );

        match self.provider.generate(text).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("{} chat request failed: {}", self.provider.name(), e);
                let detail = match e.downcast_ref::<Error>() {
                    Some(Error::ChatProvider(msg)) => msg.clone(),
                    _ => e.to_string(),
                };
                format!("{} Error: {}", self.provider.name(), detail)
            }
        }
    }
}
