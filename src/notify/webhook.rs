use crate::core::{ClosureError, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Outbound JSON POST used for definition webhooks and external caller callbacks.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn post_json(&self, url: &str, body: &JsonValue) -> Result<()>;
}

/// `reqwest`-backed sender with a per-request timeout.
#[derive(Clone)]
pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClosureError::Notification(format!("build http client: {err}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn post_json(&self, url: &str, body: &JsonValue) -> Result<()> {
        self.client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|err| ClosureError::Notification(format!("POST {url}: {err}")))?
            .error_for_status()
            .map_err(|err| ClosureError::Notification(format!("POST {url}: {err}")))?;
        Ok(())
    }
}
