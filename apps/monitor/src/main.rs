use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use monitoring_cell::adapters::{HttpShiftDetector, LogNotificationSender, WebhookNotificationSender};
use monitoring_cell::{CoreDependencies, MonitoringCore};
use shared_config::AppConfig;
use shared_database::{KeyValueStore, MemoryPersistentStore, MemoryStore, PersistentStore, RedisStore, SupabaseStore};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting correlation monitor");

    // Load configuration
    let config = AppConfig::from_env();

    let detector_url = config
        .shift_detector_url
        .clone()
        .context("SHIFT_DETECTOR_URL must be set")?;
    let detector = HttpShiftDetector::new(detector_url, HTTP_TIMEOUT)?;

    let shared_store = shared_store(&config).await;
    let persistent_store = persistent_store(&config);

    let mut deps = CoreDependencies::new(config.clone(), Arc::new(detector))
        .with_shared_store(shared_store)
        .with_persistent_store(persistent_store);

    match &config.alert_webhook_url {
        Some(url) => {
            deps = deps.with_notifier(Arc::new(WebhookNotificationSender::new(url.clone(), HTTP_TIMEOUT)?));
        }
        None => {
            warn!("ALERT_WEBHOOK_URL not set, alerts are only logged");
            deps = deps.with_notifier(Arc::new(LogNotificationSender));
        }
    }

    let core = MonitoringCore::new(deps).await;
    if config.alert_default_recipient.is_none() {
        warn!("ALERT_DEFAULT_RECIPIENT not set, notifications wait for a subscriber");
    }
    core.start();
    info!(instance = %config.instance_id, "Correlation monitor running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    core.stop().await;
    Ok(())
}

async fn shared_store(config: &AppConfig) -> Arc<dyn KeyValueStore> {
    if config.is_shared_store_configured() {
        match RedisStore::new(config).await {
            Ok(store) => return Arc::new(store),
            Err(e) => warn!("Redis unavailable, falling back to in-process store: {}", e),
        }
    }
    Arc::new(MemoryStore::new("local"))
}

fn persistent_store(config: &AppConfig) -> Arc<dyn PersistentStore> {
    if config.is_persistent_store_configured() {
        match SupabaseStore::new(config) {
            Ok(store) => return Arc::new(store),
            Err(e) => warn!("Supabase unavailable, archiving in memory: {}", e),
        }
    }
    Arc::new(MemoryPersistentStore::new())
}
