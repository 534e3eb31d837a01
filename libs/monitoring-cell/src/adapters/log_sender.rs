use async_trait::async_trait;
use tracing::info;

use shared_models::{Alert, NotificationError};

use crate::collaborators::NotificationSender;

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    fn channel(&self) -> &str {
        "log"
    }

    async fn send(&self, alert: &Alert, recipient: &str) -> Result<(), NotificationError> {
        info!(
            recipient,
            alert_id = %alert.id,
            priority = %alert.priority,
            "Notification: {}", alert.title
        );
        Ok(())
    }
}
