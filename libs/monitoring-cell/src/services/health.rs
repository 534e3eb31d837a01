// =====================================================================================
// HEALTH AGGREGATOR
// =====================================================================================
// Runs every registered probe concurrently under its own timeout and folds the
// results into the worst observed state. Events fire on transitions only.
// =====================================================================================

use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use resilience_cell::{CircuitBreakerFactory, CircuitState};
use shared_database::{KeyValueStore, PersistentStore};
use shared_models::{ComponentHealth, HealthState, HealthStatus};

use crate::collaborators::{MetricsSink, ResourceSampler};
use crate::error::MonitoringError;
use crate::models::{HealthEvent, HealthEventKind};
use crate::services::event_bus::EventBus;
use crate::services::metrics::names;
use crate::services::scheduler::MonitoringScheduler;

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub state: HealthState,
    pub message: Option<String>,
}

impl ProbeReport {
    pub fn new(state: HealthState) -> Self {
        Self { state, message: None }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// One dependency check. An `Err` or a timeout maps to `failure_state()`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    fn failure_state(&self) -> HealthState {
        HealthState::Critical
    }

    async fn check(&self) -> Result<ProbeReport, MonitoringError>;
}

pub struct SharedStoreProbe {
    store: Arc<dyn KeyValueStore>,
}

impl SharedStoreProbe {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthProbe for SharedStoreProbe {
    fn name(&self) -> &str {
        "shared_store"
    }

    async fn check(&self) -> Result<ProbeReport, MonitoringError> {
        self.store.ping().await?;
        Ok(ProbeReport::new(HealthState::Optimal))
    }
}

pub struct PersistentStoreProbe {
    store: Arc<dyn PersistentStore>,
}

impl PersistentStoreProbe {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthProbe for PersistentStoreProbe {
    fn name(&self) -> &str {
        "persistent_store"
    }

    async fn check(&self) -> Result<ProbeReport, MonitoringError> {
        self.store.ping().await?;
        Ok(ProbeReport::new(HealthState::Optimal))
    }
}

/// Open breakers put the system at risk; half-open ones degrade it.
pub struct BreakerProbe {
    breakers: Arc<CircuitBreakerFactory>,
}

impl BreakerProbe {
    pub fn new(breakers: Arc<CircuitBreakerFactory>) -> Self {
        Self { breakers }
    }
}

#[async_trait]
impl HealthProbe for BreakerProbe {
    fn name(&self) -> &str {
        "circuit_breakers"
    }

    async fn check(&self) -> Result<ProbeReport, MonitoringError> {
        let open = self.breakers.breakers_in(CircuitState::Open);
        if !open.is_empty() {
            return Ok(ProbeReport::new(HealthState::AtRisk).with_message(format!("open: {}", open.join(", "))));
        }

        let half_open = self.breakers.breakers_in(CircuitState::HalfOpen);
        if !half_open.is_empty() {
            return Ok(
                ProbeReport::new(HealthState::Degraded).with_message(format!("half-open: {}", half_open.join(", ")))
            );
        }

        Ok(ProbeReport::new(HealthState::Optimal))
    }
}

pub struct ResourceProbe {
    sampler: Arc<dyn ResourceSampler>,
}

impl ResourceProbe {
    pub fn new(sampler: Arc<dyn ResourceSampler>) -> Self {
        Self { sampler }
    }

    pub fn state_for(ratio: f64) -> HealthState {
        if ratio < 0.7 {
            HealthState::Optimal
        } else if ratio < 0.8 {
            HealthState::Healthy
        } else if ratio < 0.9 {
            HealthState::Degraded
        } else if ratio < 0.95 {
            HealthState::AtRisk
        } else {
            HealthState::Critical
        }
    }
}

#[async_trait]
impl HealthProbe for ResourceProbe {
    fn name(&self) -> &str {
        "resources"
    }

    async fn check(&self) -> Result<ProbeReport, MonitoringError> {
        match self.sampler.memory_usage_ratio() {
            Some(ratio) => Ok(ProbeReport::new(Self::state_for(ratio))
                .with_message(format!("memory usage {:.1}%", ratio * 100.0))),
            None => Ok(ProbeReport::new(HealthState::Healthy).with_message("memory usage unavailable")),
        }
    }
}

/// Reports the scheduler's own view: stopped or failing cycles degrade health.
pub struct SchedulerProbe {
    scheduler: Weak<MonitoringScheduler>,
}

impl SchedulerProbe {
    pub fn new(scheduler: &Arc<MonitoringScheduler>) -> Self {
        Self {
            scheduler: Arc::downgrade(scheduler),
        }
    }
}

#[async_trait]
impl HealthProbe for SchedulerProbe {
    fn name(&self) -> &str {
        "scheduler"
    }

    fn failure_state(&self) -> HealthState {
        HealthState::Degraded
    }

    async fn check(&self) -> Result<ProbeReport, MonitoringError> {
        let scheduler = self
            .scheduler
            .upgrade()
            .ok_or_else(|| MonitoringError::Probe("scheduler dropped".to_string()))?;
        let stats = scheduler.stats();

        if !stats.running {
            return Ok(ProbeReport::new(HealthState::Degraded).with_message("scheduler stopped"));
        }
        let error_rate = stats.error_rate();
        let state = if error_rate > 0.5 {
            HealthState::AtRisk
        } else if error_rate > 0.2 {
            HealthState::Degraded
        } else {
            HealthState::Optimal
        };
        Ok(ProbeReport::new(state).with_message(format!("cycle error rate {:.2}", error_rate)))
    }
}

#[derive(Debug, Clone)]
pub struct ProbeCycle {
    pub status: HealthStatus,
    pub previous: HealthState,
    pub event: Option<HealthEvent>,
    /// True only on the probe that moved the system into `Critical`.
    pub entered_critical: bool,
}

pub struct HealthAggregator {
    probes: RwLock<Vec<Arc<dyn HealthProbe>>>,
    probe_timeout: Duration,
    started: Instant,
    current: RwLock<HealthStatus>,
    probing: tokio::sync::Mutex<()>,
    bus: Arc<EventBus>,
    metrics: Arc<dyn MetricsSink>,
}

impl HealthAggregator {
    pub fn new(probe_timeout: Duration, bus: Arc<EventBus>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            probes: RwLock::new(Vec::new()),
            probe_timeout,
            started: Instant::now(),
            current: RwLock::new(HealthStatus::unknown()),
            probing: tokio::sync::Mutex::new(()),
            bus,
            metrics,
        }
    }

    pub fn register(&self, probe: Arc<dyn HealthProbe>) {
        info!(probe = probe.name(), "Registered health probe");
        self.probes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(probe);
    }

    pub fn probe_names(&self) -> Vec<String> {
        self.probes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|probe| probe.name().to_string())
            .collect()
    }

    /// Last computed status. Never probes.
    pub fn current(&self) -> HealthStatus {
        self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    #[instrument(skip(self))]
    pub async fn probe(&self) -> ProbeCycle {
        // Serialized so transitions are computed against the previous probe.
        let _probing = self.probing.lock().await;

        let probes: Vec<Arc<dyn HealthProbe>> = self
            .probes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let components = join_all(probes.into_iter().map(|probe| self.run_probe(probe))).await;
        let overall = HealthState::worst(components.iter().map(|component| component.state));

        let status = HealthStatus {
            overall,
            components,
            checked_at: Utc::now(),
            uptime_secs: self.started.elapsed().as_secs(),
        };
        let previous = {
            let mut current = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *current, status.clone()).overall
        };

        self.metrics.increment(names::HEALTH_PROBES, 1);
        self.metrics.gauge(names::HEALTH_OVERALL, severity(overall));

        let event = transition_event(previous, &status);
        if let Some(event) = &event {
            match event.kind {
                HealthEventKind::Critical => {
                    error!(previous = %previous, components = ?event.components, "System health is CRITICAL")
                }
                HealthEventKind::Degraded => {
                    warn!(previous = %previous, current = %overall, components = ?event.components, "System health degraded")
                }
                HealthEventKind::Recovered => info!(previous = %previous, current = %overall, "System health recovered"),
            }
            self.bus.publish_health(event.clone());
        } else {
            debug!(state = %overall, "Health unchanged");
        }

        ProbeCycle {
            entered_critical: overall == HealthState::Critical && previous != HealthState::Critical,
            status,
            previous,
            event,
        }
    }

    async fn run_probe(&self, probe: Arc<dyn HealthProbe>) -> ComponentHealth {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.probe_timeout, probe.check()).await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        let (state, message) = match outcome {
            Ok(Ok(report)) => (report.state, report.message),
            Ok(Err(e)) => {
                warn!(probe = probe.name(), "Health probe failed: {}", e);
                (probe.failure_state(), Some(e.to_string()))
            }
            Err(_) => {
                warn!(probe = probe.name(), timeout = ?self.probe_timeout, "Health probe timed out");
                (
                    probe.failure_state(),
                    Some(format!("timed out after {}ms", self.probe_timeout.as_millis())),
                )
            }
        };

        ComponentHealth {
            name: probe.name().to_string(),
            state,
            response_time_ms,
            message,
            last_checked: Utc::now(),
        }
    }
}

fn transition_event(previous: HealthState, status: &HealthStatus) -> Option<HealthEvent> {
    let current = status.overall;
    if current == previous {
        return None;
    }

    let kind = if current == HealthState::Critical {
        HealthEventKind::Critical
    } else if !current.is_at_least_healthy() {
        HealthEventKind::Degraded
    } else if !previous.is_at_least_healthy() {
        HealthEventKind::Recovered
    } else {
        return None;
    };

    let components = status
        .components
        .iter()
        .filter(|component| !component.state.is_at_least_healthy())
        .map(|component| component.name.clone())
        .collect();

    Some(HealthEvent {
        kind,
        previous,
        current,
        components,
        at: status.checked_at,
    })
}

fn severity(state: HealthState) -> f64 {
    match state {
        HealthState::Optimal => 0.0,
        HealthState::Healthy => 1.0,
        HealthState::Degraded => 2.0,
        HealthState::AtRisk => 3.0,
        HealthState::Critical => 4.0,
    }
}
