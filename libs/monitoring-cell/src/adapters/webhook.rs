use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, instrument, warn};

use shared_models::{Alert, NotificationError};

use crate::collaborators::NotificationSender;

/// Posts each alert as JSON to a single webhook endpoint.
pub struct WebhookNotificationSender {
    client: Client,
    url: String,
}

impl WebhookNotificationSender {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Unreachable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl NotificationSender for WebhookNotificationSender {
    fn channel(&self) -> &str {
        "webhook"
    }

    #[instrument(skip(self, alert), fields(alert_id = %alert.id))]
    async fn send(&self, alert: &Alert, recipient: &str) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "recipient": recipient,
                "alert": alert,
            }))
            .send()
            .await
            .map_err(|e| NotificationError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Webhook rejected alert ({}): {}", status, body);
            return Err(NotificationError::Rejected {
                alert_id: alert.id.to_string(),
                reason: format!("status {}", status),
            });
        }

        debug!("Webhook accepted alert");
        Ok(())
    }
}
