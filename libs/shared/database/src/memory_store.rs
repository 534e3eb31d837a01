use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::error::StoreError;
use crate::kv::KeyValueStore;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process key/value store. Used when no Redis endpoint is configured
/// and as a controllable node in tests.
pub struct MemoryStore {
    name: String,
    entries: Mutex<HashMap<String, Entry>>,
    available: AtomicBool,
    reconnect_restores: AtomicBool,
    reconnect_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            reconnect_restores: AtomicBool::new(true),
            reconnect_calls: AtomicUsize::new(0),
        }
    }

    /// Simulates an outage: every operation fails until made available again.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Controls whether `reconnect` brings the store back.
    pub fn set_reconnect_restores(&self, restores: bool) {
        self.reconnect_restores.store(restores, Ordering::SeqCst);
    }

    pub fn reconnect_calls(&self) -> usize {
        self.reconnect_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock_entries().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("{} is unreachable", self.name)))
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn live_value(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) -> Option<String> {
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.ensure_available()?;
        let mut entries = self.lock_entries();
        Ok(Self::live_value(&mut entries, key, Instant::now()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.ensure_available()?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.lock_entries().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let now = Instant::now();
        Ok(self
            .lock_entries()
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut entries = self.lock_entries();
        if Self::live_value(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let mut entries = self.lock_entries();
        match Self::live_value(&mut entries, key, Instant::now()) {
            Some(current) if current == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut entries = self.lock_entries();
        if Self::live_value(&mut entries, key, now).as_deref() != Some(expected) {
            return Ok(false);
        }
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(true)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_available()
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        self.reconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.reconnect_restores.load(Ordering::SeqCst) {
            self.set_available(true);
            debug!(store = %self.name, "Memory store reconnected");
        }
        self.ensure_available()
    }
}
