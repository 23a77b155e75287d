//! Notification dispatch — hands a rendered notification to the push gateway.
//! Ships a Gotify transport: POST `{endpoint}/message?token=...` with a JSON body.

use std::time::Duration;

use async_trait::async_trait;
use dosewatch_core::{DoseError, Notification, Result};

/// Anything that can deliver a notification.
#[async_trait]
pub trait Deliver: Send + Sync {
    /// Send once. No retries: the caller has already claimed the dose.
    async fn send(&self, notification: &Notification) -> Result<()>;

    /// Endpoint description for logs.
    fn endpoint(&self) -> &str;
}

/// Gotify push gateway client.
pub struct GotifyTransport {
    endpoint: String,
    token: String,
    client: reqwest::Client,
}

impl GotifyTransport {
    pub fn new(endpoint: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| delivery_error(endpoint, None, e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    fn message_url(&self) -> String {
        format!("{}/message", self.endpoint)
    }
}

#[async_trait]
impl Deliver for GotifyTransport {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let resp = self
            .client
            .post(self.message_url())
            .query(&[("token", self.token.as_str())])
            .json(notification)
            .send()
            .await
            .map_err(|e| delivery_error(&self.endpoint, None, e.to_string()))?;

        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(delivery_error(&self.endpoint, Some(status.as_u16()), body));
        }

        tracing::info!("✅ Notification sent to {}: {}", self.endpoint, notification.title);
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn delivery_error(endpoint: &str, status: Option<u16>, message: String) -> DoseError {
    DoseError::Delivery {
        endpoint: endpoint.to_string(),
        status,
        message,
    }
}

/// The fixed message sent by the "test notification" action.
pub fn test_notification(extras: &serde_json::Map<String, serde_json::Value>) -> Notification {
    Notification {
        title: "Test Notification".into(),
        message: "If you can read this, dose reminders will reach you.".into(),
        extras: extras.clone(),
    }
}
