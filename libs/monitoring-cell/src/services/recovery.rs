// =====================================================================================
// RECOVERY ORCHESTRATOR
// =====================================================================================
// Walks an ordered ladder of increasingly invasive actions, re-probing health after
// each one and stopping at the first that restores at least HEALTHY. An exhausted
// ladder puts the subsystem in degraded mode until someone intervenes.
// =====================================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use resilience_cell::CircuitBreakerFactory;
use shared_database::{KeyValueStore, PersistentStore};
use shared_models::{Alert, AlertPriority};

use crate::collaborators::{ManagedComponent, MetricsSink};
use crate::error::MonitoringError;
use crate::services::alerts::AlertPipeline;
use crate::services::health::HealthAggregator;
use crate::services::metrics::names;
use crate::services::scheduler::MonitoringScheduler;

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait RecoveryAction: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self) -> Result<(), MonitoringError>;
}

pub struct ReconnectSharedStore {
    store: Arc<dyn KeyValueStore>,
}

impl ReconnectSharedStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecoveryAction for ReconnectSharedStore {
    fn name(&self) -> &str {
        "reconnect_shared_store"
    }

    async fn execute(&self) -> Result<(), MonitoringError> {
        self.store.reconnect().await?;
        Ok(())
    }
}

pub struct ReconnectPersistentStore {
    store: Arc<dyn PersistentStore>,
}

impl ReconnectPersistentStore {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecoveryAction for ReconnectPersistentStore {
    fn name(&self) -> &str {
        "reconnect_persistent_store"
    }

    async fn execute(&self) -> Result<(), MonitoringError> {
        self.store.reconnect().await?;
        Ok(())
    }
}

/// Stops components in reverse order, then starts them in registration order.
pub struct RestartComponents {
    components: Vec<Arc<dyn ManagedComponent>>,
}

impl RestartComponents {
    pub fn new(components: Vec<Arc<dyn ManagedComponent>>) -> Self {
        Self { components }
    }
}

#[async_trait]
impl RecoveryAction for RestartComponents {
    fn name(&self) -> &str {
        "restart_components"
    }

    async fn execute(&self) -> Result<(), MonitoringError> {
        for component in self.components.iter().rev() {
            if let Err(e) = component.stop().await {
                warn!(component = component.name(), "Failed to stop component: {}", e);
            }
        }
        for component in &self.components {
            component.start().await?;
            info!(component = component.name(), "Component restarted");
        }
        Ok(())
    }
}

/// Last resort: drain the scheduler, reset every breaker, reconnect every store
/// and start the scheduler again.
pub struct FullReinitialization {
    scheduler: Arc<MonitoringScheduler>,
    breakers: Arc<CircuitBreakerFactory>,
    shared_store: Option<Arc<dyn KeyValueStore>>,
    persistent_store: Option<Arc<dyn PersistentStore>>,
    grace: Duration,
}

impl FullReinitialization {
    pub fn new(
        scheduler: Arc<MonitoringScheduler>,
        breakers: Arc<CircuitBreakerFactory>,
        shared_store: Option<Arc<dyn KeyValueStore>>,
        persistent_store: Option<Arc<dyn PersistentStore>>,
        grace: Duration,
    ) -> Self {
        Self {
            scheduler,
            breakers,
            shared_store,
            persistent_store,
            grace,
        }
    }
}

#[async_trait]
impl RecoveryAction for FullReinitialization {
    fn name(&self) -> &str {
        "full_reinitialization"
    }

    async fn execute(&self) -> Result<(), MonitoringError> {
        self.scheduler.shutdown(self.grace).await;
        self.breakers.reset_all();

        let mut failures = Vec::new();
        if let Some(store) = &self.shared_store {
            if let Err(e) = store.reconnect().await {
                failures.push(format!("shared store: {}", e));
            }
        }
        if let Some(store) = &self.persistent_store {
            if let Err(e) = store.reconnect().await {
                failures.push(format!("persistent store: {}", e));
            }
        }

        self.scheduler.start();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MonitoringError::Recovery(failures.join("; ")))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Recovered { action: String },
    Exhausted { attempted: Vec<String> },
    /// Another recovery was already walking the ladder.
    InProgress,
}

pub struct RecoveryOrchestrator {
    actions: Vec<Arc<dyn RecoveryAction>>,
    health: Arc<HealthAggregator>,
    pipeline: Arc<AlertPipeline>,
    halt_on_exhaustion: Option<Arc<dyn ManagedComponent>>,
    step_timeout: Duration,
    metrics: Arc<dyn MetricsSink>,
    degraded: AtomicBool,
    in_progress: tokio::sync::Mutex<()>,
}

impl RecoveryOrchestrator {
    pub fn new(
        actions: Vec<Arc<dyn RecoveryAction>>,
        health: Arc<HealthAggregator>,
        pipeline: Arc<AlertPipeline>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            actions,
            health,
            pipeline,
            halt_on_exhaustion: None,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            metrics,
            degraded: AtomicBool::new(false),
            in_progress: tokio::sync::Mutex::new(()),
        }
    }

    /// Component stopped when the ladder is exhausted, normally the scheduler.
    pub fn with_halt_on_exhaustion(mut self, component: Arc<dyn ManagedComponent>) -> Self {
        self.halt_on_exhaustion = Some(component);
        self
    }

    /// Upper bound on a single action; a step that overruns counts as failed.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn action_names(&self) -> Vec<String> {
        self.actions.iter().map(|action| action.name().to_string()).collect()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn clear_degraded(&self) {
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!("Degraded mode cleared");
        }
    }

    #[instrument(skip(self))]
    pub async fn recover(&self) -> RecoveryOutcome {
        let Ok(_running) = self.in_progress.try_lock() else {
            info!("Recovery already in progress");
            return RecoveryOutcome::InProgress;
        };

        self.metrics.increment(names::RECOVERY_ATTEMPTS, 1);
        warn!(steps = self.actions.len(), "Starting recovery");

        let mut attempted = Vec::with_capacity(self.actions.len());
        for action in &self.actions {
            let name = action.name().to_string();
            info!(action = %name, "Running recovery action");
            match tokio::time::timeout(self.step_timeout, action.execute()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(action = %name, "Recovery action failed: {}", e),
                Err(_) => warn!(
                    action = %name,
                    timeout_ms = self.step_timeout.as_millis() as u64,
                    "Recovery action timed out"
                ),
            }
            attempted.push(name.clone());

            let state = self.health.probe().await.status.overall;
            if state.is_at_least_healthy() {
                info!(action = %name, state = %state, "Recovery succeeded");
                self.metrics.increment(names::RECOVERY_SUCCEEDED, 1);
                self.clear_degraded();
                return RecoveryOutcome::Recovered { action: name };
            }
            info!(action = %name, state = %state, "Health not restored, escalating");
        }

        self.enter_degraded_mode(&attempted).await;
        RecoveryOutcome::Exhausted { attempted }
    }

    async fn enter_degraded_mode(&self, attempted: &[String]) {
        self.degraded.store(true, Ordering::SeqCst);
        self.metrics.increment(names::RECOVERY_EXHAUSTED, 1);
        error!(attempted = ?attempted, "Recovery exhausted, entering DEGRADED mode");

        self.pipeline
            .emit_system_alert(Alert::system(
                AlertPriority::Critical,
                "Monitoring degraded",
                format!(
                    "Recovery exhausted after {}. Monitoring cycles are suspended until manual intervention.",
                    attempted.join(", ")
                ),
            ))
            .await;

        if let Some(component) = &self.halt_on_exhaustion {
            if let Err(e) = component.stop().await {
                error!(component = component.name(), "Failed to halt component: {}", e);
            }
        }
    }
}
