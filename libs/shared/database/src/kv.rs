use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Shared key/value store used for dedup state, alert archival and
/// distributed lock votes.
///
/// The compare operations are atomic on the store side; a lock holder only
/// touches a key whose value still equals its owner token.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Endpoint label used in logs and health components.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// `SET key value NX PX ttl`. Returns `true` when the key was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    async fn extend_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Re-establishes the connection, trying the primary endpoint before the fallback.
    async fn reconnect(&self) -> Result<(), StoreError>;
}
