#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use monitoring_cell::services::{
    AccuracyHistory, AdaptiveThrottleController, AlertPipeline, EventBus, MetricsCollectorService, ParameterStore,
};
use monitoring_cell::{MetricsSink, NotificationSender, RateLimitSink, ResourceSampler, ShiftDetector};
use resilience_cell::CircuitBreakerFactory;
use shared_config::{AlertConfig, AppConfig};
use shared_database::{KeyValueStore, StoreError};
use shared_models::{Alert, DetectOptions, DetectorError, NotificationError, ShiftCandidate, TuningParameters};

pub struct StaticDetector {
    candidates: Mutex<Vec<ShiftCandidate>>,
    failure: Mutex<Option<DetectorError>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl StaticDetector {
    pub fn new(candidates: Vec<ShiftCandidate>) -> Self {
        Self {
            candidates: Mutex::new(candidates),
            failure: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_candidates(&self, candidates: Vec<ShiftCandidate>) {
        *self.candidates.lock().unwrap() = candidates;
    }

    pub fn fail_with(&self, failure: Option<DetectorError>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShiftDetector for StaticDetector {
    async fn detect(&self, options: DetectOptions) -> Result<Vec<ShiftCandidate>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = self.failure.lock().unwrap().clone() {
            return Err(failure);
        }
        let mut candidates = self.candidates.lock().unwrap().clone();
        candidates.truncate(options.limit);
        Ok(candidates)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    failing: std::sync::atomic::AtomicBool,
}

impl RecordingNotifier {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// `(alert title, recipient)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, recipient: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|(_, r)| r == recipient).count()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    fn channel(&self) -> &str {
        "recording"
    }

    async fn send(&self, alert: &Alert, recipient: &str) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Unreachable("recording channel down".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((alert.title.clone(), recipient.to_string()));
        Ok(())
    }
}

pub struct FixedSampler {
    ratio: Mutex<Option<f64>>,
}

impl FixedSampler {
    pub fn new(ratio: Option<f64>) -> Self {
        Self {
            ratio: Mutex::new(ratio),
        }
    }

    pub fn set(&self, ratio: Option<f64>) {
        *self.ratio.lock().unwrap() = ratio;
    }
}

impl ResourceSampler for FixedSampler {
    fn memory_usage_ratio(&self) -> Option<f64> {
        *self.ratio.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingRateSink {
    rates: Mutex<Vec<f64>>,
}

impl RecordingRateSink {
    pub fn last(&self) -> Option<f64> {
        self.rates.lock().unwrap().last().copied()
    }
}

impl RateLimitSink for RecordingRateSink {
    fn set_admission_rate(&self, rate: f64) {
        self.rates.lock().unwrap().push(rate);
    }
}

/// A store whose calls never complete, like a node that accepted the
/// connection and then went silent.
pub struct HangingStore {
    calls: AtomicUsize,
}

impl HangingStore {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn hang<T>(&self) -> Result<T, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[async_trait]
impl KeyValueStore for HangingStore {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        self.hang().await
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), StoreError> {
        self.hang().await
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        self.hang().await
    }

    async fn set_if_absent(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool, StoreError> {
        self.hang().await
    }

    async fn delete_if_equals(&self, _key: &str, _expected: &str) -> Result<bool, StoreError> {
        self.hang().await
    }

    async fn extend_if_equals(&self, _key: &str, _expected: &str, _ttl: Duration) -> Result<bool, StoreError> {
        self.hang().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.hang().await
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        self.hang().await
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.instance_id = "test-instance".to_string();
    config.monitoring.cycle_interval_ms = 1_000;
    config.monitoring.health_check_interval_ms = 500;
    config.monitoring.probe_timeout_ms = 100;
    config.monitoring.shutdown_grace_ms = 200;
    config.coordination.lock_ttl_ms = 1_000;
    config.coordination.retry_count = 0;
    config
}

/// Everything an alert pipeline test needs to poke at.
pub struct PipelineFixture {
    pub pipeline: Arc<AlertPipeline>,
    pub metrics: Arc<MetricsCollectorService>,
    pub bus: Arc<EventBus>,
    pub throttle: Arc<AdaptiveThrottleController>,
    pub sampler: Arc<FixedSampler>,
    pub history: Arc<AccuracyHistory>,
    pub parameters: Arc<ParameterStore>,
    pub breakers: Arc<CircuitBreakerFactory>,
}

pub fn pipeline_fixture<F>(config: AlertConfig, customize: F) -> PipelineFixture
where
    F: FnOnce(AlertPipeline) -> AlertPipeline,
{
    let metrics = Arc::new(MetricsCollectorService::new());
    let sink: Arc<dyn MetricsSink> = metrics.clone();
    let bus = Arc::new(EventBus::new());
    let sampler = Arc::new(FixedSampler::new(Some(0.3)));
    let throttle = Arc::new(AdaptiveThrottleController::new(
        sampler.clone(),
        Arc::new(RecordingRateSink::default()),
        sink.clone(),
    ));
    let history = Arc::new(AccuracyHistory::new(1_000, Duration::from_secs(30 * 24 * 3600)));
    let parameters = Arc::new(ParameterStore::new(TuningParameters::new(
        config.default_correlation_threshold,
    )));
    let breakers = Arc::new(CircuitBreakerFactory::new());

    let pipeline = AlertPipeline::new(
        config,
        parameters.clone(),
        history.clone(),
        throttle.clone(),
        breakers.clone(),
        bus.clone(),
        sink,
    );

    PipelineFixture {
        pipeline: Arc::new(customize(pipeline)),
        metrics,
        bus,
        throttle,
        sampler,
        history,
        parameters,
        breakers,
    }
}

/// Distinct pairs `f{i}a|f{i}b` sharing one correlation value.
pub fn distinct_candidates(count: usize, correlation: f64) -> Vec<ShiftCandidate> {
    (0..count)
        .map(|i| ShiftCandidate::new(format!("f{}a", i), format!("f{}b", i), correlation))
        .collect()
}
