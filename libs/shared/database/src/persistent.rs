use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use shared_models::{Alert, TuningParameters};

use crate::error::StoreError;

/// Durable archive for alerts and tuning parameter sets. Writes are best-effort.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    fn name(&self) -> &str;

    async fn archive_alert(&self, alert: &Alert) -> Result<(), StoreError>;

    async fn archive_parameters(&self, parameters: &TuningParameters) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn reconnect(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Archive {
    alerts: Vec<Alert>,
    parameters: Vec<TuningParameters>,
}

pub struct MemoryPersistentStore {
    archive: Mutex<Archive>,
    available: AtomicBool,
    reconnect_restores: AtomicBool,
    reconnect_calls: AtomicUsize,
}

impl Default for MemoryPersistentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPersistentStore {
    pub fn new() -> Self {
        Self {
            archive: Mutex::new(Archive::default()),
            available: AtomicBool::new(true),
            reconnect_restores: AtomicBool::new(true),
            reconnect_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_reconnect_restores(&self, restores: bool) {
        self.reconnect_restores.store(restores, Ordering::SeqCst);
    }

    pub fn reconnect_calls(&self) -> usize {
        self.reconnect_calls.load(Ordering::SeqCst)
    }

    pub fn archived_alerts(&self) -> Vec<Alert> {
        self.lock_archive().alerts.clone()
    }

    pub fn archived_parameters(&self) -> Vec<TuningParameters> {
        self.lock_archive().parameters.clone()
    }

    fn lock_archive(&self) -> std::sync::MutexGuard<'_, Archive> {
        self.archive.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("persistent store is unreachable".to_string()))
        }
    }
}

#[async_trait]
impl PersistentStore for MemoryPersistentStore {
    fn name(&self) -> &str {
        "memory-archive"
    }

    async fn archive_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.lock_archive().alerts.push(alert.clone());
        Ok(())
    }

    async fn archive_parameters(&self, parameters: &TuningParameters) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.lock_archive().parameters.push(parameters.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_available()
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        self.reconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.reconnect_restores.load(Ordering::SeqCst) {
            self.set_available(true);
        }
        self.ensure_available()
    }
}
