// =====================================================================================
// MONITORING CYCLE SCHEDULER
// =====================================================================================
// Fires the monitoring cycle on a fixed period, bounded by a concurrency cap,
// optionally under a cluster-wide lock, always through the cycle breaker.
// =====================================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use resilience_cell::{
    CircuitBreaker, CircuitBreakerFactory, CircuitBreakerOptions, CoordinatorError, DistributedCoordinator,
    DistributedLock,
};
use shared_config::MonitoringConfig;
use shared_models::{Alert, AlertPriority, DetectOptions};

use crate::collaborators::{ManagedComponent, MetricsSink, ResourceSampler, ShiftDetector};
use crate::error::MonitoringError;
use crate::models::{CycleReport, SchedulerStats};
use crate::services::alerts::AlertPipeline;
use crate::services::metrics::names;
use crate::services::shadow::ShadowEvaluator;
use crate::services::tuning::ParameterStore;

pub const CYCLE_BREAKER: &str = "monitoring-cycle";
pub const CYCLE_LOCK: &str = "monitoring-cycle";

/// Everything the scheduler needs, gathered so construction stays readable.
pub struct SchedulerParts {
    pub config: MonitoringConfig,
    pub detector: Arc<dyn ShiftDetector>,
    pub pipeline: Arc<AlertPipeline>,
    pub parameters: Arc<ParameterStore>,
    pub shadow: Arc<ShadowEvaluator>,
    pub breakers: Arc<CircuitBreakerFactory>,
    pub coordinator: Option<Arc<DistributedCoordinator>>,
    pub lock_ttl: Duration,
    pub sampler: Arc<dyn ResourceSampler>,
    pub metrics: Arc<dyn MetricsSink>,
    pub health_trigger: Arc<Notify>,
}

#[derive(Debug)]
pub enum TickOutcome {
    Completed(CycleReport),
    Failed(MonitoringError),
    /// Concurrency cap reached; nothing ran.
    Throttled,
    /// Another instance holds the cycle lock; nothing ran.
    Contended,
}

#[derive(Default)]
struct CycleCounters {
    cycles_completed: u64,
    cycles_failed: u64,
    ticks_throttled: u64,
    ticks_contended: u64,
    average_cycle_ms: f64,
    last_cycle_at: Option<chrono::DateTime<Utc>>,
}

struct SlotGuard<'a> {
    active: &'a AtomicUsize,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MonitoringScheduler {
    me: Weak<MonitoringScheduler>,
    config: MonitoringConfig,
    detector: Arc<dyn ShiftDetector>,
    pipeline: Arc<AlertPipeline>,
    parameters: Arc<ParameterStore>,
    shadow: Arc<ShadowEvaluator>,
    breaker: Arc<CircuitBreaker>,
    coordinator: Option<Arc<DistributedCoordinator>>,
    lock_ttl: Duration,
    sampler: Arc<dyn ResourceSampler>,
    metrics: Arc<dyn MetricsSink>,
    health_trigger: Arc<Notify>,
    running: AtomicBool,
    active: AtomicUsize,
    counters: Mutex<CycleCounters>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    in_flight: Mutex<JoinSet<()>>,
    held_locks: Mutex<HashMap<String, DistributedLock>>,
}

impl MonitoringScheduler {
    pub fn new(parts: SchedulerParts) -> Arc<Self> {
        let period = parts.config.cycle_interval();
        let breaker = parts.breakers.get_or_create(
            CircuitBreakerOptions::new(CYCLE_BREAKER).with_timeout(period.mul_f64(0.8)),
        );

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config: parts.config,
            detector: parts.detector,
            pipeline: parts.pipeline,
            parameters: parts.parameters,
            shadow: parts.shadow,
            breaker,
            coordinator: parts.coordinator,
            lock_ttl: parts.lock_ttl,
            sampler: parts.sampler,
            metrics: parts.metrics,
            health_trigger: parts.health_trigger,
            running: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            counters: Mutex::new(CycleCounters::default()),
            ticker: Mutex::new(None),
            in_flight: Mutex::new(JoinSet::new()),
            held_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn period(&self) -> Duration {
        self.config.cycle_interval()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn lock_counters(&self) -> MutexGuard<'_, CycleCounters> {
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Begins ticking. The first tick fires immediately. Returns `false` when
    /// already running.
    #[instrument(skip(self))]
    pub fn start(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already running");
            return false;
        }

        let me = self.me.clone();
        let period = self.period().max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(scheduler) = me.upgrade() else {
                    break;
                };
                if !scheduler.is_running() {
                    break;
                }
                scheduler.dispatch();
            }
        });

        if let Some(previous) = self
            .ticker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle)
        {
            previous.abort();
        }
        info!(period_ms = period.as_millis() as u64, "Monitoring scheduler started");
        true
    }

    /// Prevents new ticks. In-flight cycles run to completion. Returns `false`
    /// when already stopped.
    #[instrument(skip(self))]
    pub fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Some(ticker) = self
            .ticker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            ticker.abort();
        }
        info!(active_jobs = self.active_jobs(), "Monitoring scheduler stopped");
        true
    }

    /// Stops, waits up to `grace` for in-flight cycles, aborts the rest and
    /// releases any lock still held.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) {
        self.stop();

        let mut in_flight = std::mem::take(&mut *self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        if !in_flight.is_empty() {
            let drained = tokio::time::timeout(grace, async {
                while in_flight.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(remaining = in_flight.len(), "Grace period elapsed, aborting in-flight cycles");
                in_flight.abort_all();
                while in_flight.join_next().await.is_some() {}
            }
        }

        self.release_held_locks().await;
    }

    fn try_acquire_slot(&self) -> Option<SlotGuard<'_>> {
        let cap = self.config.max_concurrent_jobs.max(1);
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| (active < cap).then_some(active + 1))
            .ok()
            .map(|_| SlotGuard { active: &self.active })
    }

    fn record_throttled(&self) {
        self.lock_counters().ticks_throttled += 1;
        self.metrics.increment(names::CYCLES_THROTTLED, 1);
        debug!(cap = self.config.max_concurrent_jobs, "Concurrency cap reached, skipping tick");
    }

    fn dispatch(self: Arc<Self>) {
        if self.active_jobs() >= self.config.max_concurrent_jobs.max(1) {
            self.record_throttled();
            return;
        }

        let scheduler = self.clone();
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(async move {
            scheduler.run_once().await;
        });
    }

    /// Runs one tick now: slot, lock, breaker, cycle.
    pub async fn run_once(&self) -> TickOutcome {
        let Some(_slot) = self.try_acquire_slot() else {
            self.record_throttled();
            return TickOutcome::Throttled;
        };

        let lock = match &self.coordinator {
            Some(coordinator) => match coordinator.acquire(CYCLE_LOCK, self.lock_ttl).await {
                Ok(lock) => Some(lock),
                Err(CoordinatorError::LockUnavailable { .. }) => {
                    self.lock_counters().ticks_contended += 1;
                    self.metrics.increment(names::CYCLES_CONTENDED, 1);
                    debug!("Cycle lock held elsewhere, skipping tick");
                    return TickOutcome::Contended;
                }
                Err(e) => {
                    warn!("Coordination unavailable, running cycle uncoordinated: {}", e);
                    None
                }
            },
            None => None,
        };

        let result = match &lock {
            Some(lock) => {
                self.held_locks
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(lock.token().to_string(), lock.clone());
                let result = self.run_renewing(lock).await;
                self.held_locks
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(lock.token());
                lock.release().await;
                result
            }
            None => self.execute_cycle(false).await,
        };

        match result {
            Ok(report) => {
                self.record_success(&report);
                TickOutcome::Completed(report)
            }
            Err(e) => {
                self.record_failure(&e).await;
                TickOutcome::Failed(e)
            }
        }
    }

    async fn run_renewing(&self, lock: &DistributedLock) -> Result<CycleReport, MonitoringError> {
        let renew_every = (self.lock_ttl / 2).max(Duration::from_millis(1));
        let mut renew = tokio::time::interval_at(Instant::now() + renew_every, renew_every);

        let cycle = self.execute_cycle(true);
        tokio::pin!(cycle);
        loop {
            tokio::select! {
                result = &mut cycle => return result,
                _ = renew.tick() => {
                    if let Err(e) = lock.extend(self.lock_ttl).await {
                        warn!(resource = lock.resource(), "Failed to renew cycle lock: {}", e);
                    }
                }
            }
        }
    }

    async fn execute_cycle(&self, coordinated: bool) -> Result<CycleReport, MonitoringError> {
        let started = Instant::now();
        let started_at = Utc::now();
        let parameters = self.parameters.snapshot();
        let options = DetectOptions {
            limit: self.config.detector_limit,
            lookback: self.config.lookback(),
        };

        let (candidates, shadow, pipeline) = self
            .breaker
            .call_with_filter(
                || async {
                    let candidates = self.detector.detect(options).await?;
                    let shadow = self
                        .config
                        .shadow_mode_enabled
                        .then(|| self.shadow.evaluate(&candidates, &parameters));
                    let count = candidates.len();
                    let pipeline = self.pipeline.process_with(candidates, &parameters).await;
                    Ok::<_, MonitoringError>((count, shadow, pipeline))
                },
                MonitoringError::is_validation,
            )
            .await?;

        Ok(CycleReport {
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            candidates,
            coordinated,
            parameters_version: parameters.version,
            shadow,
            pipeline,
        })
    }

    fn record_success(&self, report: &CycleReport) {
        let average = {
            let mut counters = self.lock_counters();
            counters.cycles_completed += 1;
            let n = counters.cycles_completed as f64;
            counters.average_cycle_ms += (report.duration_ms as f64 - counters.average_cycle_ms) / n;
            counters.last_cycle_at = Some(Utc::now());
            counters.average_cycle_ms
        };

        self.metrics.increment(names::CYCLES_COMPLETED, 1);
        self.metrics.histogram(names::CYCLE_DURATION_MS, report.duration_ms as f64);
        self.metrics.gauge(names::CYCLE_AVERAGE_MS, average);
        if let Some(ratio) = self.sampler.memory_usage_ratio() {
            self.metrics.gauge(names::MEMORY_USAGE_RATIO, ratio);
        }

        info!(
            duration_ms = report.duration_ms,
            candidates = report.candidates,
            alerts = report.pipeline.emitted(),
            coordinated = report.coordinated,
            "Monitoring cycle completed"
        );
    }

    async fn record_failure(&self, err: &MonitoringError) {
        self.lock_counters().cycles_failed += 1;
        self.metrics.increment(names::CYCLES_FAILED, 1);
        self.health_trigger.notify_one();

        if matches!(err, MonitoringError::CircuitOpen(_)) {
            // Already announced when the breaker opened.
            warn!("Monitoring cycle rejected: {}", err);
            return;
        }

        error!("Monitoring cycle failed: {}", err);
        self.pipeline
            .emit_system_alert(Alert::system(
                AlertPriority::High,
                "Monitoring cycle failed",
                err.to_string(),
            ))
            .await;
    }

    async fn release_held_locks(&self) {
        let held: Vec<DistributedLock> = self
            .held_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .map(|(_, lock)| lock)
            .collect();
        for lock in held {
            info!(resource = lock.resource(), "Releasing cycle lock on shutdown");
            lock.release().await;
        }
    }

    pub fn average_cycle(&self) -> Duration {
        Duration::from_secs_f64(self.lock_counters().average_cycle_ms.max(0.0) / 1000.0)
    }

    pub fn error_rate(&self) -> f64 {
        self.stats().error_rate()
    }

    pub fn stats(&self) -> SchedulerStats {
        let counters = self.lock_counters();
        SchedulerStats {
            running: self.is_running(),
            active_jobs: self.active_jobs(),
            cycles_completed: counters.cycles_completed,
            cycles_failed: counters.cycles_failed,
            ticks_throttled: counters.ticks_throttled,
            ticks_contended: counters.ticks_contended,
            average_cycle_ms: counters.average_cycle_ms,
            last_cycle_at: counters.last_cycle_at,
        }
    }
}

#[async_trait]
impl ManagedComponent for MonitoringScheduler {
    fn name(&self) -> &str {
        "scheduler"
    }

    async fn stop(&self) -> Result<(), MonitoringError> {
        MonitoringScheduler::stop(self);
        Ok(())
    }

    async fn start(&self) -> Result<(), MonitoringError> {
        MonitoringScheduler::start(self);
        Ok(())
    }
}
