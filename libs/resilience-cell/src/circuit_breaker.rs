// =====================================================================================
// CIRCUIT BREAKERS FOR EXTERNAL DEPENDENCIES
// =====================================================================================
// Every protected operation gets its own named breaker. Outcomes are counted over a
// rolling time window; once the failure ratio crosses the configured percentage the
// breaker rejects calls until the reset timeout elapses, then admits a single trial.
// =====================================================================================

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::BreakerError;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerOptions {
    pub name: String,
    pub timeout: Duration,
    pub error_threshold_pct: f64,
    pub reset_timeout: Duration,
    pub rolling_window: Duration,
    /// Minimum attempts inside the window before the ratio is evaluated.
    pub volume_threshold: u32,
}

impl CircuitBreakerOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: Duration::from_secs(30),
            error_threshold_pct: 50.0,
            reset_timeout: Duration::from_secs(30),
            rolling_window: Duration::from_secs(60),
            volume_threshold: 0,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_error_threshold_pct(mut self, pct: f64) -> Self {
        self.error_threshold_pct = pct;
        self
    }

    pub fn with_reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }

    pub fn with_rolling_window(mut self, window: Duration) -> Self {
        self.rolling_window = window;
        self
    }

    pub fn with_volume_threshold(mut self, volume: u32) -> Self {
        self.volume_threshold = volume;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerEvent {
    pub name: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub window_successes: u64,
    pub window_failures: u64,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_timeouts: u64,
    pub total_rejections: u64,
}

impl BreakerStats {
    pub fn failure_rate(&self) -> f64 {
        let attempts = self.window_successes + self.window_failures;
        if attempts == 0 {
            0.0
        } else {
            self.window_failures as f64 / attempts as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Timeout,
    /// Error matched by the caller's filter: propagated, never counted.
    Ignored,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// `(at, failed)` per attempt inside the rolling window.
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    total_calls: u64,
    total_failures: u64,
    total_timeouts: u64,
    total_rejections: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            outcomes: VecDeque::new(),
            opened_at: None,
            trial_in_flight: false,
            total_calls: 0,
            total_failures: 0,
            total_timeouts: 0,
            total_rejections: 0,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some((at, _)) = self.outcomes.front() {
            if now.duration_since(*at) > window {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn window_counts(&self) -> (u64, u64) {
        let failures = self.outcomes.iter().filter(|(_, failed)| *failed).count() as u64;
        (self.outcomes.len() as u64 - failures, failures)
    }
}

pub struct CircuitBreaker {
    options: CircuitBreakerOptions,
    inner: Mutex<BreakerInner>,
    events: broadcast::Sender<BreakerEvent>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.options.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(options: CircuitBreakerOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self::with_events(options, events)
    }

    fn with_events(options: CircuitBreakerOptions, events: broadcast::Sender<BreakerEvent>) -> Self {
        Self {
            options,
            inner: Mutex::new(BreakerInner::new()),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &CircuitBreakerOptions {
        &self.options
    }

    /// Current state. An open breaker whose reset timeout elapsed reports half-open.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    pub fn stats(&self) -> BreakerStats {
        let now = Instant::now();
        let mut inner = self.lock_inner();
        self.refresh(&mut inner, now);
        inner.prune(now, self.options.rolling_window);
        let (window_successes, window_failures) = inner.window_counts();

        BreakerStats {
            name: self.options.name.clone(),
            state: inner.state,
            window_successes,
            window_failures,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_timeouts: inner.total_timeouts,
            total_rejections: inner.total_rejections,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Closes the breaker and forgets the rolling window.
    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        inner.outcomes.clear();
        inner.opened_at = None;
        inner.trial_in_flight = false;
        self.transition(&mut inner, CircuitState::Closed);
    }

    pub fn force_open(&self) {
        let mut inner = self.lock_inner();
        inner.opened_at = Some(Instant::now());
        inner.trial_in_flight = false;
        self.transition(&mut inner, CircuitState::Open);
    }

    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with_filter(operation, |_: &E| false).await
    }

    /// Runs `operation` under the breaker. Errors for which `is_ignored` returns
    /// `true` propagate to the caller without counting as failures.
    #[instrument(skip(self, operation, is_ignored), fields(breaker = %self.options.name))]
    pub async fn call_with_filter<F, Fut, T, E, P>(&self, operation: F, is_ignored: P) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let Some(admission) = self.admit() else {
            debug!("Circuit breaker rejected call");
            return Err(BreakerError::Open(self.options.name.clone()));
        };

        let mut guard = CallGuard {
            breaker: self,
            admission,
            settled: false,
        };

        match tokio::time::timeout(self.options.timeout, operation()).await {
            Ok(Ok(value)) => {
                guard.settle(Outcome::Success);
                Ok(value)
            }
            Ok(Err(err)) => {
                let outcome = if is_ignored(&err) { Outcome::Ignored } else { Outcome::Failure };
                guard.settle(outcome);
                Err(BreakerError::Failed(err))
            }
            Err(_) => {
                guard.settle(Outcome::Timeout);
                Err(BreakerError::Timeout(self.options.timeout))
            }
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn refresh(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let ready = inner
            .opened_at
            .map_or(true, |opened| now.duration_since(opened) >= self.options.reset_timeout);
        if ready {
            inner.trial_in_flight = false;
            self.transition(inner, CircuitState::HalfOpen);
        }
    }

    fn admit(&self) -> Option<Admission> {
        let mut inner = self.lock_inner();
        self.refresh(&mut inner, Instant::now());

        let admission = match inner.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Some(Admission::Trial)
            }
            _ => None,
        };

        match admission {
            Some(_) => inner.total_calls += 1,
            None => inner.total_rejections += 1,
        }
        admission
    }

    fn record(&self, admission: Admission, outcome: Outcome) {
        let now = Instant::now();
        let mut inner = self.lock_inner();

        match outcome {
            Outcome::Failure => inner.total_failures += 1,
            Outcome::Timeout => {
                inner.total_failures += 1;
                inner.total_timeouts += 1;
            }
            Outcome::Success | Outcome::Ignored => {}
        }

        match admission {
            Admission::Trial => {
                inner.trial_in_flight = false;
                if inner.state != CircuitState::HalfOpen {
                    return;
                }
                match outcome {
                    Outcome::Success | Outcome::Ignored => {
                        inner.outcomes.clear();
                        inner.opened_at = None;
                        self.transition(&mut inner, CircuitState::Closed);
                    }
                    Outcome::Failure | Outcome::Timeout => {
                        inner.opened_at = Some(now);
                        self.transition(&mut inner, CircuitState::Open);
                    }
                }
            }
            Admission::Normal => {
                if inner.state != CircuitState::Closed || outcome == Outcome::Ignored {
                    return;
                }
                let failed = matches!(outcome, Outcome::Failure | Outcome::Timeout);
                inner.outcomes.push_back((now, failed));
                inner.prune(now, self.options.rolling_window);

                if failed && self.should_trip(&inner) {
                    inner.opened_at = Some(now);
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
        }
    }

    fn should_trip(&self, inner: &BreakerInner) -> bool {
        let (successes, failures) = inner.window_counts();
        let attempts = successes + failures;
        if attempts == 0 || attempts < u64::from(self.options.volume_threshold) {
            return false;
        }
        (failures as f64 / attempts as f64) * 100.0 > self.options.error_threshold_pct
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;

        match to {
            CircuitState::Open => warn!(breaker = %self.options.name, from = %from, "Circuit breaker opened"),
            CircuitState::HalfOpen => info!(breaker = %self.options.name, "Circuit breaker half-open, admitting trial call"),
            CircuitState::Closed => info!(breaker = %self.options.name, from = %from, "Circuit breaker closed"),
        }

        // No subscribers is fine.
        let _ = self.events.send(BreakerEvent {
            name: self.options.name.clone(),
            from,
            to,
            at: Utc::now(),
        });
    }
}

/// Settles the call's admission even when the caller drops the future mid-flight,
/// so a cancelled trial never wedges a half-open breaker.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl CallGuard<'_> {
    fn settle(&mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.record(self.admission, outcome);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            self.breaker.lock_inner().trial_in_flight = false;
        }
    }
}

type ErrorFilter<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// An operation bound to its breaker, produced by [`CircuitBreakerFactory::wrap`].
pub struct GuardedOperation<F, E> {
    breaker: Arc<CircuitBreaker>,
    operation: F,
    error_filter: Option<ErrorFilter<E>>,
}

impl<F, E> GuardedOperation<F, E> {
    pub fn with_error_filter<P>(mut self, filter: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.error_filter = Some(Arc::new(filter));
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn call<Fut, T>(&self) -> Result<T, BreakerError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let filter = self.error_filter.clone();
        self.breaker
            .call_with_filter(&self.operation, move |err: &E| filter.as_ref().is_some_and(|f| f(err)))
            .await
    }
}

/// Registry of named breakers sharing one event channel.
pub struct CircuitBreakerFactory {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    events: broadcast::Sender<BreakerEvent>,
}

impl Default for CircuitBreakerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerFactory {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            breakers: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Returns the breaker registered under `options.name`, creating it when absent.
    /// Options of an existing breaker are left untouched.
    pub fn get_or_create(&self, options: CircuitBreakerOptions) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(&options.name) {
            return existing;
        }

        let mut breakers = self.breakers.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .entry(options.name.clone())
            .or_insert_with(|| {
                debug!(breaker = %options.name, "Registering circuit breaker");
                Arc::new(CircuitBreaker::with_events(options, self.events.clone()))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    pub fn wrap<F, E>(&self, options: CircuitBreakerOptions, operation: F) -> GuardedOperation<F, E> {
        GuardedOperation {
            breaker: self.get_or_create(options),
            operation,
            error_filter: None,
        }
    }

    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn all_stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<BreakerStats> = self.snapshot().iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn breakers_in(&self, state: CircuitState) -> Vec<String> {
        let mut names: Vec<String> = self
            .snapshot()
            .iter()
            .filter(|b| b.state() == state)
            .map(|b| b.name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn open_breakers(&self) -> Vec<String> {
        self.breakers_in(CircuitState::Open)
    }

    pub fn reset_all(&self) {
        for breaker in self.snapshot() {
            breaker.reset();
        }
        info!("All circuit breakers reset");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }
}
