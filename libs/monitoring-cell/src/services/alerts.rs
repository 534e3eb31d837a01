// =====================================================================================
// ALERT PIPELINE
// =====================================================================================
// Candidate → threshold → dedup → priority/confidence → opportunity → global cap →
// notification. Each candidate is handled in isolation; one bad candidate never
// aborts the batch.
// =====================================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use resilience_cell::{CircuitBreaker, CircuitBreakerFactory, CircuitBreakerOptions};
use shared_config::AlertConfig;
use shared_database::{KeyValueStore, PersistentStore};
use shared_models::{Alert, AlertPriority, AlertType, ScoringWeights, ShiftCandidate, TuningParameters};

use crate::collaborators::{MarketDataSource, MetricsSink, NotificationSender};
use crate::error::MonitoringError;
use crate::models::{AlertPreferences, PipelineReport};
use crate::services::accuracy::AccuracyHistory;
use crate::services::event_bus::EventBus;
use crate::services::metrics::names;
use crate::services::throttle::AdaptiveThrottleController;
use crate::services::tuning::ParameterStore;

const RATE_WINDOW: Duration = Duration::from_secs(60);
const RECIPIENT_WINDOW: Duration = Duration::from_secs(3600);
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);
const ARCHIVE_TIMEOUT: Duration = Duration::from_secs(10);
const SHARED_STORE_TIMEOUT: Duration = Duration::from_secs(2);
const SHARED_STORE_MIN_VOLUME: u32 = 5;
const NEUTRAL_ACCURACY: f64 = 0.5;

/// `|current_correlation|` strictly above the league threshold (or the default).
pub fn passes_threshold(candidate: &ShiftCandidate, parameters: &TuningParameters) -> bool {
    candidate.magnitude() > parameters.threshold_for(candidate.league.as_deref())
}

/// Weighted confidence in `[0, 100]` from correlation magnitude, sample-size
/// adequacy and the league's historical accuracy.
pub fn confidence_score(
    candidate: &ShiftCandidate,
    weights: &ScoringWeights,
    adequate_sample_size: u32,
    league_accuracy: Option<f64>,
) -> f64 {
    let weights = weights.normalized();
    let sample = candidate
        .sample_size
        .map_or(0.0, |n| (f64::from(n) / f64::from(adequate_sample_size.max(1))).min(1.0));
    let accuracy = league_accuracy.unwrap_or(NEUTRAL_ACCURACY).clamp(0.0, 1.0);

    let score = weights.correlation * candidate.magnitude() + weights.sample_size * sample + weights.accuracy * accuracy;
    (score * 100.0).clamp(0.0, 100.0)
}

/// Global per-minute cap scaled by the throttle's admission rate, never below one.
pub fn scaled_cap(max_per_minute: u32, admission_rate: f64) -> u32 {
    ((f64::from(max_per_minute) * admission_rate.clamp(0.0, 1.0)).floor() as u32).max(1)
}

#[derive(Debug, Clone)]
pub struct OpportunityAssessor {
    min_confidence: f64,
    max_age: Duration,
    market_trust: f64,
}

impl OpportunityAssessor {
    pub fn from_config(config: &AlertConfig) -> Self {
        Self {
            min_confidence: config.opportunity_min_confidence,
            max_age: config.opportunity_max_age(),
            market_trust: config.market_trust.clamp(0.0, 1.0),
        }
    }

    /// Heuristic confidence, blended with the market edge when one is known.
    pub fn score(&self, confidence: f64, market_edge: Option<f64>) -> f64 {
        match market_edge {
            Some(edge) => {
                (1.0 - self.market_trust) * confidence + self.market_trust * edge.clamp(0.0, 1.0) * 100.0
            }
            None => confidence,
        }
    }

    pub fn is_opportunity(&self, score: f64, detected_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let age = (now - detected_at).to_std().unwrap_or(Duration::ZERO);
        score >= self.min_confidence && age <= self.max_age
    }
}

struct RateWindow {
    started: Instant,
    count: u32,
}

struct Subscription {
    preferences: AlertPreferences,
    recent: VecDeque<Instant>,
}

impl Subscription {
    fn prune(&mut self, now: Instant) {
        while let Some(at) = self.recent.front() {
            if now.duration_since(*at) >= RECIPIENT_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn try_record(&mut self, now: Instant, cap: u32) -> bool {
        self.prune(now);
        if self.recent.len() >= cap as usize {
            return false;
        }
        self.recent.push_back(now);
        true
    }
}

pub struct AlertPipeline {
    config: AlertConfig,
    assessor: OpportunityAssessor,
    parameters: Arc<ParameterStore>,
    history: Arc<AccuracyHistory>,
    throttle: Arc<AdaptiveThrottleController>,
    breakers: Arc<CircuitBreakerFactory>,
    bus: Arc<EventBus>,
    metrics: Arc<dyn MetricsSink>,
    store: Option<Arc<dyn KeyValueStore>>,
    persistent: Option<Arc<dyn PersistentStore>>,
    notifiers: Vec<Arc<dyn NotificationSender>>,
    market: Option<Arc<dyn MarketDataSource>>,
    dedup: tokio::sync::Mutex<HashMap<String, Instant>>,
    rate_window: Mutex<RateWindow>,
    subscribers: RwLock<HashMap<String, Subscription>>,
}

impl AlertPipeline {
    pub fn new(
        config: AlertConfig,
        parameters: Arc<ParameterStore>,
        history: Arc<AccuracyHistory>,
        throttle: Arc<AdaptiveThrottleController>,
        breakers: Arc<CircuitBreakerFactory>,
        bus: Arc<EventBus>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            assessor: OpportunityAssessor::from_config(&config),
            config,
            parameters,
            history,
            throttle,
            breakers,
            bus,
            metrics,
            store: None,
            persistent: None,
            notifiers: Vec::new(),
            market: None,
            dedup: tokio::sync::Mutex::new(HashMap::new()),
            rate_window: Mutex::new(RateWindow {
                started: Instant::now(),
                count: 0,
            }),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_shared_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_persistent_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.persistent = Some(store);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSender>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn with_market_data(mut self, market: Arc<dyn MarketDataSource>) -> Self {
        self.market = Some(market);
        self
    }

    #[instrument(skip(self, preferences))]
    pub async fn subscribe(&self, user_id: &str, preferences: AlertPreferences) -> Result<(), MonitoringError> {
        if user_id.trim().is_empty() {
            return Err(shared_models::ValidationError::InvalidPreferences("user id must not be blank".to_string()).into());
        }
        preferences.validate()?;

        let mut subscribers = self.subscribers.write().await;
        match subscribers.get_mut(user_id) {
            Some(existing) => existing.preferences = preferences,
            None => {
                subscribers.insert(
                    user_id.to_string(),
                    Subscription {
                        preferences,
                        recent: VecDeque::new(),
                    },
                );
            }
        }
        info!("Subscriber registered");
        Ok(())
    }

    pub async fn unsubscribe(&self, user_id: &str) -> bool {
        self.subscribers.write().await.remove(user_id).is_some()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn dedup_len(&self) -> usize {
        self.dedup.lock().await.len()
    }

    /// Processes a batch against the current parameter snapshot.
    pub async fn process(&self, candidates: Vec<ShiftCandidate>) -> PipelineReport {
        let parameters = self.parameters.snapshot();
        self.process_with(candidates, &parameters).await
    }

    #[instrument(skip_all, fields(candidates = candidates.len(), version = parameters.version))]
    pub async fn process_with(&self, candidates: Vec<ShiftCandidate>, parameters: &TuningParameters) -> PipelineReport {
        let mut report = PipelineReport::default();

        for candidate in candidates {
            report.received += 1;
            if let Err(e) = self.process_candidate(&candidate, parameters, &mut report).await {
                report.failed += 1;
                error!(pair = %candidate.pair_key(), "Failed to process candidate: {}", e);
            }
        }

        self.metrics.increment(names::CANDIDATES_RECEIVED, report.received as u64);
        self.metrics.increment(names::CANDIDATES_INVALID, report.invalid as u64);
        self.metrics.increment(names::CANDIDATES_FAILED, report.failed as u64);
        self.metrics.increment(names::ALERTS_DUPLICATE, report.duplicates as u64);
        self.metrics.increment(names::ALERTS_THROTTLED, report.throttled as u64);

        debug!(
            emitted = report.emitted(),
            duplicates = report.duplicates,
            throttled = report.throttled,
            "Alert batch processed"
        );
        report
    }

    async fn process_candidate(
        &self,
        candidate: &ShiftCandidate,
        parameters: &TuningParameters,
        report: &mut PipelineReport,
    ) -> Result<(), MonitoringError> {
        if let Err(e) = candidate.validate() {
            warn!(factor_a = %candidate.factor_a, factor_b = %candidate.factor_b, "Rejected invalid candidate: {}", e);
            report.invalid += 1;
            return Ok(());
        }

        if !passes_threshold(candidate, parameters) {
            report.below_threshold += 1;
            return Ok(());
        }

        let key = candidate.pair_key();
        if self.seen_locally(&key).await || self.seen_in_store(&key).await {
            report.duplicates += 1;
            return Ok(());
        }
        {
            // Re-checked under the lock; the store lookup above ran without it.
            let mut dedup = self.dedup.lock().await;
            let now = Instant::now();

            if is_fresh(&dedup, &key, now, self.config.alert_throttle_window()) {
                report.duplicates += 1;
                return Ok(());
            }
            if !self.admit(now) {
                report.throttled += 1;
                return Ok(());
            }
            dedup.insert(key.clone(), now);
        }
        self.record_in_store(&key).await;

        let alert = self.build_alert(candidate, parameters).await;
        self.deliver(&alert, report).await?;
        self.metrics.increment(names::ALERTS_EMITTED, 1);
        report.alerts.push(alert);
        Ok(())
    }

    async fn seen_locally(&self, key: &str) -> bool {
        let dedup = self.dedup.lock().await;
        is_fresh(&dedup, key, Instant::now(), self.config.alert_throttle_window())
    }

    async fn seen_in_store(&self, key: &str) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let store_key = dedup_store_key(key);
        match self.store_breaker(store).call(|| store.get(&store_key)).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!(pair = key, "Shared dedup store unavailable, using local map: {}", e);
                self.metrics.increment(names::DEDUP_STORE_FALLBACK, 1);
                false
            }
        }
    }

    async fn record_in_store(&self, key: &str) {
        let Some(store) = &self.store else {
            return;
        };
        let store_key = dedup_store_key(key);
        let stamp = Utc::now().to_rfc3339();
        let window = self.config.alert_throttle_window();
        if let Err(e) = self
            .store_breaker(store)
            .call(|| store.set(&store_key, &stamp, Some(window)))
            .await
        {
            debug!(pair = key, "Dedup entry kept local only: {}", e);
        }
    }

    fn store_breaker(&self, store: &Arc<dyn KeyValueStore>) -> Arc<CircuitBreaker> {
        self.breakers.get_or_create(
            CircuitBreakerOptions::new(format!("shared-store:{}", store.name()))
                .with_timeout(SHARED_STORE_TIMEOUT)
                .with_volume_threshold(SHARED_STORE_MIN_VOLUME),
        )
    }

    fn admit(&self, now: Instant) -> bool {
        let cap = scaled_cap(self.config.max_alerts_per_minute, self.throttle.admission_rate());
        let mut window = self.rate_window.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if now.duration_since(window.started) >= RATE_WINDOW {
            window.started = now;
            window.count = 0;
        }
        if window.count >= cap {
            return false;
        }
        window.count += 1;
        true
    }

    async fn build_alert(&self, candidate: &ShiftCandidate, parameters: &TuningParameters) -> Alert {
        let league_accuracy = candidate
            .league
            .as_deref()
            .and_then(|league| self.history.league_mean(league));
        let confidence = confidence_score(
            candidate,
            &parameters.scoring_weights,
            self.config.adequate_sample_size,
            league_accuracy,
        );

        let market_edge = match &self.market {
            Some(market) => market.market_edge(candidate).await,
            None => None,
        };
        let opportunity_score = self.assessor.score(confidence, market_edge);
        let is_opportunity = self
            .assessor
            .is_opportunity(opportunity_score, candidate.detected_at, Utc::now());

        let priority = AlertPriority::from_correlation(candidate.current_correlation);
        let (alert_type, title) = if is_opportunity {
            (
                AlertType::Opportunity,
                format!("Opportunity: {} / {}", candidate.factor_a, candidate.factor_b),
            )
        } else {
            (
                AlertType::CorrelationShift,
                format!("Correlation shift: {} / {}", candidate.factor_a, candidate.factor_b),
            )
        };
        let message = match candidate.previous_correlation {
            Some(previous) => format!(
                "Correlation between {} and {} moved from {:.2} to {:.2}",
                candidate.factor_a, candidate.factor_b, previous, candidate.current_correlation
            ),
            None => format!(
                "Correlation between {} and {} reached {:.2}",
                candidate.factor_a, candidate.factor_b, candidate.current_correlation
            ),
        };

        Alert::new(
            alert_type,
            priority,
            title,
            message,
            json!({
                "pair": candidate.pair_key(),
                "factor_a": candidate.factor_a,
                "factor_b": candidate.factor_b,
                "current_correlation": candidate.current_correlation,
                "previous_correlation": candidate.previous_correlation,
                "league": candidate.league,
                "sport": candidate.sport,
                "sample_size": candidate.sample_size,
                "confidence": confidence,
                "opportunity_score": opportunity_score,
                "market_edge": market_edge,
                "detected_at": candidate.detected_at,
            }),
        )
    }

    /// Publishes a system alert. Skips threshold, dedup and the global cap.
    #[instrument(skip(self, alert), fields(alert_id = %alert.id, priority = %alert.priority))]
    pub async fn emit_system_alert(&self, alert: Alert) {
        let mut report = PipelineReport::default();
        if let Err(e) = self.deliver(&alert, &mut report).await {
            error!("Failed to deliver system alert: {}", e);
        }
        self.metrics.increment(names::ALERTS_SYSTEM, 1);
    }

    async fn deliver(&self, alert: &Alert, report: &mut PipelineReport) -> Result<(), MonitoringError> {
        log_alert(alert);
        self.bus.publish_alert(alert.clone());

        let (sent, failed) = self.notify_subscribers(alert).await;
        report.notifications_sent += sent;
        report.notification_failures += failed;

        self.archive(alert).await
    }

    async fn notify_subscribers(&self, alert: &Alert) -> (usize, usize) {
        if self.notifiers.is_empty() {
            return (0, 0);
        }
        let recipients = self.eligible_recipients(alert).await;
        if recipients.is_empty() {
            return (0, 0);
        }

        let sends = recipients.iter().flat_map(|recipient| {
            self.notifiers
                .iter()
                .map(move |notifier| self.send_one(notifier, alert, recipient))
        });
        let results = join_all(sends).await;

        let failed = results.iter().filter(|result| result.is_err()).count();
        let sent = results.len() - failed;
        self.metrics.increment(names::NOTIFICATIONS_SENT, sent as u64);
        self.metrics.increment(names::NOTIFICATIONS_FAILED, failed as u64);
        (sent, failed)
    }

    async fn send_one(
        &self,
        notifier: &Arc<dyn NotificationSender>,
        alert: &Alert,
        recipient: &str,
    ) -> Result<(), MonitoringError> {
        let breaker = self.breakers.get_or_create(
            CircuitBreakerOptions::new(format!("notifier:{}", notifier.channel())).with_timeout(NOTIFY_TIMEOUT),
        );

        let result = breaker
            .call(|| notifier.send(alert, recipient))
            .await
            .map_err(MonitoringError::from);
        if let Err(e) = &result {
            warn!(channel = notifier.channel(), recipient, alert_id = %alert.id, "Notification failed: {}", e);
        }
        result
    }

    async fn eligible_recipients(&self, alert: &Alert) -> Vec<String> {
        let now = Instant::now();
        let global_cap = self.config.max_alerts_per_recipient_per_hour;
        let mut subscribers = self.subscribers.write().await;

        let mut recipients = Vec::new();
        for (user_id, subscription) in subscribers.iter_mut() {
            if !subscription.preferences.accepts(alert) {
                continue;
            }
            if alert.alert_type != AlertType::System {
                let cap = subscription
                    .preferences
                    .max_alerts_per_hour
                    .map_or(global_cap, |own| own.min(global_cap));
                if !subscription.try_record(now, cap) {
                    debug!(recipient = %user_id, "Recipient hourly cap reached");
                    self.metrics.increment(names::NOTIFICATIONS_CAPPED, 1);
                    continue;
                }
            }
            recipients.push(user_id.clone());
        }
        recipients.sort();
        recipients
    }

    async fn archive(&self, alert: &Alert) -> Result<(), MonitoringError> {
        let payload = serde_json::to_string(alert)?;

        if let Some(store) = &self.store {
            let key = format!("alert:archive:{}", alert.id);
            let ttl = self.config.archive_ttl();
            if let Err(e) = self
                .store_breaker(store)
                .call(|| store.set(&key, &payload, Some(ttl)))
                .await
            {
                warn!(alert_id = %alert.id, "Failed to archive alert to shared store: {}", e);
                self.metrics.increment(names::ARCHIVE_FAILED, 1);
            }
        }

        if let Some(persistent) = &self.persistent {
            let persistent = persistent.clone();
            let metrics = self.metrics.clone();
            let alert = alert.clone();
            let breaker = self.breakers.get_or_create(
                CircuitBreakerOptions::new(format!("persistent:{}", persistent.name())).with_timeout(ARCHIVE_TIMEOUT),
            );

            tokio::spawn(async move {
                if let Err(e) = breaker.call(|| persistent.archive_alert(&alert)).await {
                    warn!(alert_id = %alert.id, "Failed to archive alert to persistent store: {}", e);
                    metrics.increment(names::ARCHIVE_FAILED, 1);
                }
            });
        }

        Ok(())
    }

    /// Drops expired dedup entries and recipient windows; trims the dedup map to
    /// its size cap oldest-first. Returns the number of dedup entries removed.
    pub async fn prune(&self) -> usize {
        let now = Instant::now();
        let window = self.config.alert_throttle_window();

        let removed = {
            let mut dedup = self.dedup.lock().await;
            let before = dedup.len();
            dedup.retain(|_, at| now.duration_since(*at) < window);

            let max_entries = self.config.dedup_max_entries;
            if dedup.len() > max_entries {
                let mut by_age: Vec<(String, Instant)> = dedup.iter().map(|(k, at)| (k.clone(), *at)).collect();
                by_age.sort_by_key(|(_, at)| *at);
                let excess = dedup.len() - max_entries;
                for (key, _) in by_age.into_iter().take(excess) {
                    dedup.remove(&key);
                }
            }

            let after = dedup.len();
            self.metrics.gauge(names::DEDUP_ENTRIES, after as f64);
            before - after
        };

        for subscription in self.subscribers.write().await.values_mut() {
            subscription.prune(now);
        }

        removed
    }
}

fn is_fresh(local: &HashMap<String, Instant>, key: &str, now: Instant, window: Duration) -> bool {
    local.get(key).is_some_and(|at| now.duration_since(*at) < window)
}

fn dedup_store_key(pair: &str) -> String {
    format!("alert:dedup:{}", pair)
}

fn log_alert(alert: &Alert) {
    match alert.priority {
        AlertPriority::Critical => {
            error!(
                alert_id = %alert.id,
                alert_type = ?alert.alert_type,
                "CRITICAL ALERT TRIGGERED: {}", alert.title
            );
        }
        AlertPriority::High => {
            warn!(
                alert_id = %alert.id,
                alert_type = ?alert.alert_type,
                "HIGH PRIORITY ALERT: {}", alert.title
            );
        }
        AlertPriority::Medium | AlertPriority::Low => {
            info!(alert_id = %alert.id, "ALERT: {}", alert.title);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_weights() {
        let candidate = ShiftCandidate::new("a", "b", 0.8).with_sample_size(15);
        let score = confidence_score(&candidate, &ScoringWeights::default(), 30, None);
        // 0.5*0.8 + 0.3*0.5 + 0.2*0.5
        assert!((score - 65.0).abs() < 1e-9);
    }

    #[test]
    fn test_scaled_cap_never_zero() {
        assert_eq!(scaled_cap(10, 1.0), 10);
        assert_eq!(scaled_cap(10, 0.5), 5);
        assert_eq!(scaled_cap(10, 0.05), 1);
    }

    #[test]
    fn test_opportunity_blends_market_edge() {
        let assessor = OpportunityAssessor {
            min_confidence: 70.0,
            max_age: Duration::from_secs(900),
            market_trust: 0.5,
        };
        assert!((assessor.score(60.0, Some(0.9)) - 75.0).abs() < 1e-9);
        assert_eq!(assessor.score(60.0, None), 60.0);

        let now = Utc::now();
        assert!(assessor.is_opportunity(75.0, now - chrono::Duration::minutes(5), now));
        assert!(!assessor.is_opportunity(75.0, now - chrono::Duration::minutes(30), now));
        assert!(!assessor.is_opportunity(65.0, now, now));
    }
}
