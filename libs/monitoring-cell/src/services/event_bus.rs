use tokio::sync::broadcast;
use tracing::debug;

use shared_models::Alert;

use crate::models::HealthEvent;

const ALERT_CHANNEL_CAPACITY: usize = 1024;
const HEALTH_CHANNEL_CAPACITY: usize = 128;

/// Typed fan-out for alerts and health transitions. Slow receivers lag and
/// lose the oldest messages; publishers never block.
pub struct EventBus {
    alerts: broadcast::Sender<Alert>,
    health: broadcast::Sender<HealthEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        let (health, _) = broadcast::channel(HEALTH_CHANNEL_CAPACITY);
        Self { alerts, health }
    }

    pub fn publish_alert(&self, alert: Alert) {
        if self.alerts.send(alert).is_err() {
            debug!("No alert subscribers");
        }
    }

    pub fn publish_health(&self, event: HealthEvent) {
        if self.health.send(event).is_err() {
            debug!("No health event subscribers");
        }
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.alerts.subscribe()
    }

    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthEvent> {
        self.health.subscribe()
    }
}
