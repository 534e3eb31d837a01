// =====================================================================================
// DISTRIBUTED COORDINATION (REDLOCK-STYLE QUORUM LOCKS)
// =====================================================================================
// A lock is granted when a majority of independent store nodes accept
// `SET lock:{resource} token NX PX ttl` and enough validity time remains after
// accounting for acquisition latency and clock drift. Release and extension only
// touch keys whose value still equals the owner token.
// =====================================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::CoordinationConfig;
use shared_database::{KeyValueStore, StoreError};

use crate::error::CoordinatorError;

const CLOCK_DRIFT_FLOOR: Duration = Duration::from_millis(2);

#[derive(Debug, Clone)]
pub struct LockOptions {
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub retry_jitter: Duration,
    pub drift_factor: f64,
    /// Per-node bound on a single vote; a silent node counts as a refusal.
    pub node_timeout: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay: Duration::from_millis(200),
            retry_jitter: Duration::from_millis(100),
            drift_factor: 0.01,
            node_timeout: Duration::from_millis(250),
        }
    }
}

impl From<&CoordinationConfig> for LockOptions {
    fn from(config: &CoordinationConfig) -> Self {
        Self {
            retry_count: config.retry_count,
            retry_delay: config.retry_delay(),
            retry_jitter: config.retry_jitter(),
            drift_factor: config.drift_factor,
            node_timeout: config.node_timeout(),
        }
    }
}

type Nodes = Arc<Vec<Arc<dyn KeyValueStore>>>;

pub struct DistributedCoordinator {
    nodes: Nodes,
    options: LockOptions,
    owner_prefix: String,
}

impl std::fmt::Debug for DistributedCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCoordinator")
            .field("nodes", &self.nodes.len())
            .field("owner_prefix", &self.owner_prefix)
            .finish()
    }
}

impl DistributedCoordinator {
    /// Pings every node; fails unless a quorum answers.
    #[instrument(skip(nodes, options))]
    pub async fn connect(
        nodes: Vec<Arc<dyn KeyValueStore>>,
        options: LockOptions,
        instance_id: &str,
    ) -> Result<Self, CoordinatorError> {
        if nodes.is_empty() {
            return Err(CoordinatorError::StoreUnavailable("no coordination nodes configured".to_string()));
        }

        let quorum = nodes.len() / 2 + 1;
        let pings = join_all(nodes.iter().map(|node| bounded(options.node_timeout, node.ping()))).await;
        let reachable = pings.iter().filter(|result| result.is_ok()).count();

        if reachable < quorum {
            warn!(reachable, quorum, "Coordination quorum unreachable");
            return Err(CoordinatorError::StoreUnavailable(format!(
                "{} of {} nodes reachable, quorum is {}",
                reachable,
                nodes.len(),
                quorum
            )));
        }

        info!(nodes = nodes.len(), reachable, "Distributed coordinator initialized");
        Ok(Self {
            nodes: Arc::new(nodes),
            options,
            owner_prefix: instance_id.to_string(),
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn quorum(&self) -> usize {
        self.nodes.len() / 2 + 1
    }

    #[instrument(skip(self), fields(ttl_ms = ttl.as_millis() as u64))]
    pub async fn acquire(&self, resource: &str, ttl: Duration) -> Result<DistributedLock, CoordinatorError> {
        let key = lock_key(resource);
        let token = format!("{}:{}", self.owner_prefix, Uuid::new_v4());
        let attempts = self.options.retry_count.saturating_add(1);
        let mut every_node_failed = true;

        for attempt in 0..attempts {
            let started = Instant::now();
            let votes = join_all(
                self.nodes
                    .iter()
                    .map(|node| bounded(self.options.node_timeout, node.set_if_absent(&key, &token, ttl))),
            )
            .await;

            let granted = votes.iter().filter(|vote| matches!(vote, Ok(true))).count();
            let errored = votes.iter().filter(|vote| vote.is_err()).count();
            every_node_failed &= errored == self.nodes.len();

            if granted >= self.quorum() {
                if let Some(validity) = remaining_validity(ttl, started.elapsed(), self.options.drift_factor) {
                    debug!(resource, granted, attempt, "Lock acquired");
                    return Ok(DistributedLock {
                        inner: Arc::new(LockInner {
                            resource: resource.to_string(),
                            key,
                            token,
                            nodes: self.nodes.clone(),
                            drift_factor: self.options.drift_factor,
                            node_timeout: self.options.node_timeout,
                            expires_at: Mutex::new(Instant::now() + validity),
                            released: AtomicBool::new(false),
                        }),
                    });
                }
            }

            release_on_nodes(&self.nodes, &key, &token, self.options.node_timeout).await;

            if attempt + 1 < attempts {
                tokio::time::sleep(self.retry_pause()).await;
            }
        }

        if every_node_failed {
            Err(CoordinatorError::StoreUnavailable(format!(
                "no coordination node answered while locking '{}'",
                resource
            )))
        } else {
            Err(CoordinatorError::LockUnavailable {
                resource: resource.to_string(),
            })
        }
    }

    fn retry_pause(&self) -> Duration {
        let jitter_ms = u64::try_from(self.options.retry_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.options.retry_delay + Duration::from_millis(jitter)
    }
}

struct LockInner {
    resource: String,
    key: String,
    token: String,
    nodes: Nodes,
    drift_factor: f64,
    node_timeout: Duration,
    expires_at: Mutex<Instant>,
    released: AtomicBool,
}

/// Handle on a granted lock. Clones share the same grant.
#[derive(Clone)]
pub struct DistributedLock {
    inner: Arc<LockInner>,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("resource", &self.inner.resource)
            .field("remaining", &self.remaining())
            .field("released", &self.is_released())
            .finish()
    }
}

impl DistributedLock {
    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    pub fn token(&self) -> &str {
        &self.inner.token
    }

    pub fn expires_at(&self) -> Instant {
        *self.inner.expires_at.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at().saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Pushes the expiry out to `ttl` from now on a quorum of nodes.
    #[instrument(skip(self), fields(resource = %self.inner.resource))]
    pub async fn extend(&self, ttl: Duration) -> Result<(), CoordinatorError> {
        let lost = || CoordinatorError::LockLost {
            resource: self.inner.resource.clone(),
        };
        if self.is_released() {
            return Err(lost());
        }

        let started = Instant::now();
        let votes = join_all(
            self.inner
                .nodes
                .iter()
                .map(|node| {
                    bounded(
                        self.inner.node_timeout,
                        node.extend_if_equals(&self.inner.key, &self.inner.token, ttl),
                    )
                }),
        )
        .await;
        let granted = votes.iter().filter(|vote| matches!(vote, Ok(true))).count();
        let quorum = self.inner.nodes.len() / 2 + 1;

        match remaining_validity(ttl, started.elapsed(), self.inner.drift_factor) {
            Some(validity) if granted >= quorum => {
                *self.inner.expires_at.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
                    Instant::now() + validity;
                debug!(granted, "Lock extended");
                Ok(())
            }
            _ => {
                warn!(granted, quorum, "Lock extension failed");
                Err(lost())
            }
        }
    }

    /// Deletes the key on every node where it still carries this owner's token.
    /// Safe to call repeatedly, after expiry, or after another holder took over.
    #[instrument(skip(self), fields(resource = %self.inner.resource))]
    pub async fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        release_on_nodes(&self.inner.nodes, &self.inner.key, &self.inner.token, self.inner.node_timeout).await;
        debug!("Lock released");
    }
}

fn lock_key(resource: &str) -> String {
    format!("lock:{}", resource)
}

fn remaining_validity(ttl: Duration, elapsed: Duration, drift_factor: f64) -> Option<Duration> {
    let drift = ttl.mul_f64(drift_factor.max(0.0)) + CLOCK_DRIFT_FLOOR;
    ttl.checked_sub(elapsed)
        .and_then(|left| left.checked_sub(drift))
        .filter(|validity| !validity.is_zero())
}

async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or_else(|_| Err(StoreError::Unavailable(format!("no answer within {:?}", timeout))))
}

async fn release_on_nodes(nodes: &[Arc<dyn KeyValueStore>], key: &str, token: &str, timeout: Duration) {
    let results = join_all(
        nodes
            .iter()
            .map(|node| bounded(timeout, node.delete_if_equals(key, token))),
    )
    .await;
    for (node, result) in nodes.iter().zip(results) {
        if let Err(e) = result {
            debug!(node = node.name(), "Lock release on node failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_accounts_for_drift() {
        let ttl = Duration::from_millis(1000);
        let validity = remaining_validity(ttl, Duration::from_millis(100), 0.01).unwrap();
        assert_eq!(validity, Duration::from_millis(888));
    }

    #[test]
    fn test_validity_exhausted() {
        let ttl = Duration::from_millis(10);
        assert_eq!(remaining_validity(ttl, Duration::from_millis(9), 0.01), None);
    }
}
