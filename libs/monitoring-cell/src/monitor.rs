// =====================================================================================
// MONITORING CORE
// =====================================================================================
// Wires every service together and owns the periodic tasks: monitoring cycle
// (via the scheduler), health probing, throttle adjustment, self-tuning and
// maintenance. Each task runs on its own timer against shared state.
// =====================================================================================

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use resilience_cell::{CircuitBreakerFactory, CircuitState, DistributedCoordinator, LockOptions};
use shared_config::AppConfig;
use shared_database::{KeyValueStore, PersistentStore};
use shared_models::{AccuracyRecord, Alert, HealthStatus, TuningParameters};

use crate::adapters::ProcResourceSampler;
use crate::collaborators::{
    ManagedComponent, MarketDataSource, MetricsSink, NoopRateLimitSink, NotificationSender, RateLimitSink,
    ResourceSampler, ShiftDetector,
};
use crate::error::MonitoringError;
use crate::models::{AlertPreferences, CoreMetrics, HealthEvent};
use crate::services::health::{
    BreakerProbe, HealthAggregator, HealthProbe, PersistentStoreProbe, ProbeCycle, ResourceProbe, SchedulerProbe,
    SharedStoreProbe,
};
use crate::services::metrics::names;
use crate::services::recovery::{
    FullReinitialization, ReconnectPersistentStore, ReconnectSharedStore, RecoveryAction, RecoveryOrchestrator,
    RestartComponents,
};
use crate::services::scheduler::{MonitoringScheduler, SchedulerParts};
use crate::services::throttle::ThrottleAdjustment;
use crate::services::tuning::TuningOutcome;
use crate::services::{
    AccuracyHistory, AdaptiveThrottleController, AlertPipeline, EventBus, MetricsCollectorService, ParameterStore,
    SelfTuningController, ShadowEvaluator,
};

const SHADOW_WINDOW: usize = 100;

/// Collaborators handed to [`MonitoringCore::new`].
pub struct CoreDependencies {
    config: AppConfig,
    detector: Arc<dyn ShiftDetector>,
    shared_store: Option<Arc<dyn KeyValueStore>>,
    persistent_store: Option<Arc<dyn PersistentStore>>,
    notifiers: Vec<Arc<dyn NotificationSender>>,
    lock_nodes: Vec<Arc<dyn KeyValueStore>>,
    sampler: Arc<dyn ResourceSampler>,
    rate_sink: Arc<dyn RateLimitSink>,
    market: Option<Arc<dyn MarketDataSource>>,
    components: Vec<Arc<dyn ManagedComponent>>,
    probes: Vec<Arc<dyn HealthProbe>>,
    recovery_actions: Option<Vec<Arc<dyn RecoveryAction>>>,
}

impl CoreDependencies {
    pub fn new(config: AppConfig, detector: Arc<dyn ShiftDetector>) -> Self {
        Self {
            config,
            detector,
            shared_store: None,
            persistent_store: None,
            notifiers: Vec::new(),
            lock_nodes: Vec::new(),
            sampler: Arc::new(ProcResourceSampler::default()),
            rate_sink: Arc::new(NoopRateLimitSink),
            market: None,
            components: Vec::new(),
            probes: Vec::new(),
            recovery_actions: None,
        }
    }

    pub fn with_shared_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.shared_store = Some(store);
        self
    }

    pub fn with_persistent_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.persistent_store = Some(store);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSender>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Independent lock nodes. Without any, the shared store is the single node.
    pub fn with_lock_nodes(mut self, nodes: Vec<Arc<dyn KeyValueStore>>) -> Self {
        self.lock_nodes = nodes;
        self
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_rate_sink(mut self, sink: Arc<dyn RateLimitSink>) -> Self {
        self.rate_sink = sink;
        self
    }

    pub fn with_market_data(mut self, market: Arc<dyn MarketDataSource>) -> Self {
        self.market = Some(market);
        self
    }

    /// Extra component restarted by the recovery ladder.
    pub fn with_component(mut self, component: Arc<dyn ManagedComponent>) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    /// Replaces the default recovery ladder.
    pub fn with_recovery_actions(mut self, actions: Vec<Arc<dyn RecoveryAction>>) -> Self {
        self.recovery_actions = Some(actions);
        self
    }
}

pub struct MonitoringCore {
    config: AppConfig,
    metrics: Arc<MetricsCollectorService>,
    bus: Arc<EventBus>,
    breakers: Arc<CircuitBreakerFactory>,
    parameters: Arc<ParameterStore>,
    history: Arc<AccuracyHistory>,
    shadow: Arc<ShadowEvaluator>,
    throttle: Arc<AdaptiveThrottleController>,
    pipeline: Arc<AlertPipeline>,
    scheduler: Arc<MonitoringScheduler>,
    health: Arc<HealthAggregator>,
    recovery: Arc<RecoveryOrchestrator>,
    tuning: Arc<SelfTuningController>,
    coordinator: Option<Arc<DistributedCoordinator>>,
    health_trigger: Arc<Notify>,
    running: AtomicBool,
    recovering: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitoringCore {
    #[instrument(skip(deps), fields(instance = %deps.config.instance_id))]
    pub async fn new(deps: CoreDependencies) -> Arc<Self> {
        let CoreDependencies {
            config,
            detector,
            shared_store,
            persistent_store,
            notifiers,
            lock_nodes,
            sampler,
            rate_sink,
            market,
            components,
            probes,
            recovery_actions,
        } = deps;

        let metrics = Arc::new(MetricsCollectorService::new());
        let sink: Arc<dyn MetricsSink> = metrics.clone();
        let bus = Arc::new(EventBus::new());
        let breakers = Arc::new(CircuitBreakerFactory::new());
        let parameters = Arc::new(ParameterStore::new(TuningParameters::new(
            config.alerts.default_correlation_threshold,
        )));
        let history = Arc::new(AccuracyHistory::new(
            config.tuning.history_max_records,
            config.tuning.history_max_age(),
        ));
        let shadow = Arc::new(ShadowEvaluator::new(SHADOW_WINDOW));
        let throttle = Arc::new(AdaptiveThrottleController::new(sampler.clone(), rate_sink, sink.clone()));

        let mut pipeline = AlertPipeline::new(
            config.alerts.clone(),
            parameters.clone(),
            history.clone(),
            throttle.clone(),
            breakers.clone(),
            bus.clone(),
            sink.clone(),
        );
        if let Some(store) = &shared_store {
            pipeline = pipeline.with_shared_store(store.clone());
        }
        if let Some(store) = &persistent_store {
            pipeline = pipeline.with_persistent_store(store.clone());
        }
        for notifier in notifiers {
            pipeline = pipeline.with_notifier(notifier);
        }
        if let Some(market) = market {
            pipeline = pipeline.with_market_data(market);
        }
        let pipeline = Arc::new(pipeline);
        if let Some(recipient) = &config.alert_default_recipient {
            if let Err(e) = pipeline.subscribe(recipient, AlertPreferences::default()).await {
                warn!(recipient = %recipient, "Default alert recipient rejected: {}", e);
            }
        }

        let coordinator = Self::connect_coordinator(&config, lock_nodes, shared_store.as_ref()).await;

        let health_trigger = Arc::new(Notify::new());
        let scheduler = MonitoringScheduler::new(SchedulerParts {
            config: config.monitoring.clone(),
            detector,
            pipeline: pipeline.clone(),
            parameters: parameters.clone(),
            shadow: shadow.clone(),
            breakers: breakers.clone(),
            coordinator: coordinator.clone(),
            lock_ttl: config.coordination.lock_ttl(),
            sampler: sampler.clone(),
            metrics: sink.clone(),
            health_trigger: health_trigger.clone(),
        });

        let health = Arc::new(HealthAggregator::new(
            config.monitoring.probe_timeout(),
            bus.clone(),
            sink.clone(),
        ));
        if let Some(store) = &shared_store {
            health.register(Arc::new(SharedStoreProbe::new(store.clone())));
        }
        if let Some(store) = &persistent_store {
            health.register(Arc::new(PersistentStoreProbe::new(store.clone())));
        }
        health.register(Arc::new(BreakerProbe::new(breakers.clone())));
        health.register(Arc::new(ResourceProbe::new(sampler)));
        health.register(Arc::new(SchedulerProbe::new(&scheduler)));
        for probe in probes {
            health.register(probe);
        }

        let actions = recovery_actions.unwrap_or_else(|| {
            let mut actions: Vec<Arc<dyn RecoveryAction>> = Vec::new();
            if let Some(store) = &shared_store {
                actions.push(Arc::new(ReconnectSharedStore::new(store.clone())));
            }
            if let Some(store) = &persistent_store {
                actions.push(Arc::new(ReconnectPersistentStore::new(store.clone())));
            }

            let mut restartable: Vec<Arc<dyn ManagedComponent>> = vec![throttle.clone()];
            restartable.extend(components);
            restartable.push(scheduler.clone());
            actions.push(Arc::new(RestartComponents::new(restartable)));

            actions.push(Arc::new(FullReinitialization::new(
                scheduler.clone(),
                breakers.clone(),
                shared_store.clone(),
                persistent_store.clone(),
                config.monitoring.shutdown_grace(),
            )));
            actions
        });
        let recovery = Arc::new(
            RecoveryOrchestrator::new(actions, health.clone(), pipeline.clone(), sink.clone())
                .with_step_timeout(config.monitoring.recovery_step_timeout())
                .with_halt_on_exhaustion(scheduler.clone()),
        );

        let mut tuning = SelfTuningController::new(
            config.tuning.clone(),
            parameters.clone(),
            history.clone(),
            shadow.clone(),
            sink,
        );
        if let Some(store) = &persistent_store {
            tuning = tuning.with_persistent_store(store.clone());
        }

        let (shutdown, _) = watch::channel(false);
        info!(
            coordinated = coordinator.is_some(),
            probes = ?health.probe_names(),
            recovery_steps = ?recovery.action_names(),
            "Monitoring core initialized"
        );

        Arc::new(Self {
            config,
            metrics,
            bus,
            breakers,
            parameters,
            history,
            shadow,
            throttle,
            pipeline,
            scheduler,
            health,
            recovery,
            tuning: Arc::new(tuning),
            coordinator,
            health_trigger,
            running: AtomicBool::new(false),
            recovering: Arc::new(AtomicBool::new(false)),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    async fn connect_coordinator(
        config: &AppConfig,
        lock_nodes: Vec<Arc<dyn KeyValueStore>>,
        shared_store: Option<&Arc<dyn KeyValueStore>>,
    ) -> Option<Arc<DistributedCoordinator>> {
        if !config.coordination.enabled {
            info!("Distributed coordination disabled");
            return None;
        }

        let nodes = if lock_nodes.is_empty() {
            shared_store.cloned().into_iter().collect()
        } else {
            lock_nodes
        };
        if nodes.is_empty() {
            warn!("No lock nodes available, running uncoordinated");
            return None;
        }

        match DistributedCoordinator::connect(nodes, LockOptions::from(&config.coordination), &config.instance_id).await
        {
            Ok(coordinator) => Some(Arc::new(coordinator)),
            Err(e) => {
                warn!("Coordinator unavailable, running uncoordinated: {}", e);
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the scheduler and every periodic task. Returns `false` when
    /// already running.
    #[instrument(skip(self))]
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shutdown.send_replace(false);

        let monitoring = &self.config.monitoring;
        let handles = vec![
            self.spawn_health_loop(monitoring.health_check_interval()),
            self.spawn_periodic("throttle", monitoring.throttle_interval(), |core| async move {
                core.adjust_throttle().await;
            }),
            self.spawn_periodic("tuning", monitoring.tuning_interval(), |core| async move {
                core.run_tuning().await;
            }),
            self.spawn_periodic("maintenance", monitoring.maintenance_interval(), |core| async move {
                core.run_maintenance().await;
            }),
        ];
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(handles);

        self.scheduler.start();
        info!(instance = %self.config.instance_id, "Monitoring core started");
        true
    }

    /// Cancels periodic tasks, drains the scheduler within the grace period and
    /// releases any held lock.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let grace = self.config.monitoring.shutdown_grace();
        self.shutdown.send_replace(true);

        self.scheduler.shutdown(grace).await;

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        let deadline = Instant::now() + grace;
        for mut handle in tasks {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        info!("Monitoring core stopped");
    }

    fn spawn_periodic<F, Fut>(self: &Arc<Self>, task: &'static str, period: Duration, run: F) -> JoinHandle<()>
    where
        F: Fn(Arc<MonitoringCore>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let core = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        let period = period.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let Some(core) = core.upgrade() else {
                    break;
                };
                run(core).await;
            }
            debug!(task, "Periodic task stopped");
        })
    }

    fn spawn_health_loop(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let core = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        let trigger = self.health_trigger.clone();
        let mut breaker_events = self.breakers.subscribe();
        let period = period.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = trigger.notified() => debug!("Health probe requested"),
                    event = breaker_events.recv() => match event {
                        Ok(event) if event.to == CircuitState::Open => {
                            debug!(breaker = %event.name, "Breaker opened, probing health");
                        }
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.changed() => break,
                }
                let Some(core) = core.upgrade() else {
                    break;
                };
                core.run_health_check().await;
            }
            debug!("Health loop stopped");
        })
    }

    /// Probes now; starts recovery when this probe entered `Critical`.
    pub async fn run_health_check(self: &Arc<Self>) -> ProbeCycle {
        let cycle = self.health.probe().await;
        if cycle.entered_critical {
            self.spawn_recovery();
        }
        cycle
    }

    fn spawn_recovery(self: &Arc<Self>) {
        if self.recovering.swap(true, Ordering::SeqCst) {
            return;
        }
        let recovery = self.recovery.clone();
        let recovering = self.recovering.clone();
        let handle = tokio::spawn(async move {
            let outcome = recovery.recover().await;
            recovering.store(false, Ordering::SeqCst);
            info!(outcome = ?outcome, "Recovery finished");
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    pub async fn adjust_throttle(&self) -> ThrottleAdjustment {
        let stats = self.scheduler.stats();
        let adjustment = self
            .throttle
            .adjust(self.scheduler.average_cycle(), self.scheduler.period(), stats.error_rate());
        if let Some(alert) = adjustment.alert.clone() {
            self.pipeline.emit_system_alert(alert).await;
        }
        adjustment
    }

    pub async fn run_tuning(&self) -> TuningOutcome {
        self.tuning.run().await
    }

    /// Prunes expired state and refreshes housekeeping gauges.
    #[instrument(skip(self))]
    pub async fn run_maintenance(&self) {
        let dedup_removed = self.pipeline.prune().await;
        let history_removed = self.history.prune(Utc::now());

        self.metrics
            .gauge(names::BREAKERS_OPEN, self.breakers.open_breakers().len() as f64);
        self.metrics.gauge(names::ACCURACY_RECORDS, self.history.len() as f64);
        self.metrics
            .gauge(names::SHADOW_MATCH_RATE, self.shadow.stats().rolling_match_rate);

        debug!(dedup_removed, history_removed, "Maintenance complete");
    }

    /// Fresh probe of every dependency.
    pub async fn get_health(self: &Arc<Self>) -> HealthStatus {
        self.run_health_check().await.status
    }

    pub fn get_metrics(&self) -> CoreMetrics {
        CoreMetrics {
            metrics: self.metrics.snapshot(),
            scheduler: self.scheduler.stats(),
            throttle: self.throttle.current(),
            shadow: self.shadow.stats(),
            breakers: self.breakers.all_stats(),
            parameters_version: self.parameters.snapshot().version,
            degraded_mode: self.recovery.is_degraded(),
        }
    }

    pub async fn subscribe(&self, user_id: &str, preferences: AlertPreferences) -> Result<(), MonitoringError> {
        self.pipeline.subscribe(user_id, preferences).await
    }

    pub async fn unsubscribe(&self, user_id: &str) -> bool {
        self.pipeline.unsubscribe(user_id).await
    }

    /// Real-time stream of every generated alert.
    pub fn alerts(&self) -> broadcast::Receiver<Alert> {
        self.bus.subscribe_alerts()
    }

    pub fn health_events(&self) -> broadcast::Receiver<HealthEvent> {
        self.bus.subscribe_health()
    }

    /// Feeds a realized prediction accuracy into the tuning history.
    pub fn record_accuracy(&self, league: &str, accuracy: f64) {
        if league.trim().is_empty() || !accuracy.is_finite() {
            warn!(league, accuracy, "Ignoring invalid accuracy record");
            return;
        }
        self.history.record(AccuracyRecord::new(league, accuracy));
    }

    pub fn is_degraded(&self) -> bool {
        self.recovery.is_degraded()
    }

    /// Leaves degraded mode after manual intervention and restarts cycles.
    #[instrument(skip(self))]
    pub fn resume(&self) {
        self.recovery.clear_degraded();
        if self.is_running() {
            self.scheduler.start();
        }
        self.health_trigger.notify_one();
    }

    pub fn parameters(&self) -> Arc<TuningParameters> {
        self.parameters.snapshot()
    }

    pub fn scheduler(&self) -> &Arc<MonitoringScheduler> {
        &self.scheduler
    }

    pub fn pipeline(&self) -> &Arc<AlertPipeline> {
        &self.pipeline
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerFactory> {
        &self.breakers
    }

    pub fn is_coordinated(&self) -> bool {
        self.coordinator.is_some()
    }
}
