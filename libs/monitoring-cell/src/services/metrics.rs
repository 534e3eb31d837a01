// =====================================================================================
// METRICS COLLECTOR SERVICE
// =====================================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::collaborators::MetricsSink;
use crate::models::{HistogramSummary, MetricsSnapshot};

pub mod names {
    pub const CYCLES_COMPLETED: &str = "monitor.cycles.completed";
    pub const CYCLES_FAILED: &str = "monitor.cycles.failed";
    pub const CYCLES_THROTTLED: &str = "monitor.cycles.throttled";
    pub const CYCLES_CONTENDED: &str = "monitor.cycles.contended";
    pub const CYCLE_DURATION_MS: &str = "monitor.cycle.duration_ms";
    pub const CYCLE_AVERAGE_MS: &str = "monitor.cycle.average_ms";

    pub const CANDIDATES_RECEIVED: &str = "alerts.candidates.received";
    pub const CANDIDATES_INVALID: &str = "alerts.candidates.invalid";
    pub const CANDIDATES_FAILED: &str = "alerts.candidates.failed";
    pub const ALERTS_EMITTED: &str = "alerts.emitted";
    pub const ALERTS_DUPLICATE: &str = "alerts.duplicate";
    pub const ALERTS_THROTTLED: &str = "alerts.throttled";
    pub const ALERTS_SYSTEM: &str = "alerts.system";
    pub const NOTIFICATIONS_SENT: &str = "alerts.notifications.sent";
    pub const NOTIFICATIONS_FAILED: &str = "alerts.notifications.failed";
    pub const NOTIFICATIONS_CAPPED: &str = "alerts.notifications.recipient_capped";
    pub const DEDUP_STORE_FALLBACK: &str = "alerts.dedup.store_fallback";
    pub const DEDUP_ENTRIES: &str = "alerts.dedup.entries";
    pub const ARCHIVE_FAILED: &str = "alerts.archive.failed";

    pub const MEMORY_USAGE_RATIO: &str = "resources.memory.usage_ratio";
    pub const THROTTLE_LOAD_SCORE: &str = "throttle.load_score";
    pub const THROTTLE_ADMISSION_RATE: &str = "throttle.admission_rate";

    pub const HEALTH_PROBES: &str = "health.probes";
    pub const HEALTH_OVERALL: &str = "health.overall";
    pub const RECOVERY_ATTEMPTS: &str = "recovery.attempts";
    pub const RECOVERY_SUCCEEDED: &str = "recovery.succeeded";
    pub const RECOVERY_EXHAUSTED: &str = "recovery.exhausted";

    pub const TUNING_RUNS: &str = "tuning.runs";
    pub const TUNING_SKIPPED: &str = "tuning.skipped";
    pub const SHADOW_MATCH_RATE: &str = "shadow.match_rate";
    pub const BREAKERS_OPEN: &str = "breakers.open";
    pub const ACCURACY_RECORDS: &str = "accuracy.records";
}

const MAX_SAMPLES: usize = 1000;
const DRAIN_SAMPLES: usize = 500;

#[derive(Debug)]
pub struct MetricsCollectorService {
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<HashMap<String, f64>>,
    histograms: RwLock<HashMap<String, Vec<f64>>>,
    start_time: Instant,
}

impl Default for MetricsCollectorService {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollectorService {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .map_or(0, |value| value.load(Ordering::Relaxed))
    }

    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters: BTreeMap<String, u64> = self
            .counters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(name, value)| (name.clone(), value.load(Ordering::Relaxed)))
            .collect();

        let gauges: BTreeMap<String, f64> = self
            .gauges
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(name, value)| (name.clone(), *value))
            .collect();

        let histograms: BTreeMap<String, HistogramSummary> = self
            .histograms
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(name, samples)| (name.clone(), summarize(samples)))
            .collect();

        MetricsSnapshot {
            counters,
            gauges,
            histograms,
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn reset_metrics(&self) {
        self.counters.write().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
        self.gauges.write().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
        self.histograms.write().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }
}

impl MetricsSink for MetricsCollectorService {
    fn increment(&self, name: &str, by: u64) {
        if let Some(counter) = self
            .counters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
        {
            counter.fetch_add(by, Ordering::Relaxed);
            return;
        }

        self.counters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(by, Ordering::Relaxed);
    }

    fn gauge(&self, name: &str, value: f64) {
        self.gauges
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), value);
    }

    fn histogram(&self, name: &str, value: f64) {
        let mut histograms = self.histograms.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let samples = histograms.entry(name.to_string()).or_default();
        samples.push(value);

        // Keep only recent samples
        if samples.len() > MAX_SAMPLES {
            samples.drain(0..DRAIN_SAMPLES);
        }
    }
}

fn summarize(samples: &[f64]) -> HistogramSummary {
    if samples.is_empty() {
        return HistogramSummary::default();
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let p95_index = ((sorted.len() as f64 * 0.95) as usize).min(sorted.len() - 1);

    HistogramSummary {
        count: samples.len() as u64,
        mean: samples.iter().sum::<f64>() / samples.len() as f64,
        p95: sorted[p95_index],
        max: sorted[sorted.len() - 1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_gauges() {
        let metrics = MetricsCollectorService::new();
        metrics.increment(names::ALERTS_EMITTED, 2);
        metrics.increment(names::ALERTS_EMITTED, 3);
        metrics.gauge(names::THROTTLE_ADMISSION_RATE, 0.5);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counter(names::ALERTS_EMITTED), 5);
        assert_eq!(snapshot.counter(names::ALERTS_THROTTLED), 0);
        assert_eq!(snapshot.gauge(names::THROTTLE_ADMISSION_RATE), Some(0.5));
    }

    #[test]
    fn test_histogram_summary_and_cap() {
        let metrics = MetricsCollectorService::new();
        for value in 1..=100 {
            metrics.histogram(names::CYCLE_DURATION_MS, value as f64);
        }

        let summary = &metrics.snapshot().histograms[names::CYCLE_DURATION_MS];
        assert_eq!(summary.count, 100);
        assert_eq!(summary.p95, 96.0);
        assert_eq!(summary.max, 100.0);
        assert!((summary.mean - 50.5).abs() < 1e-9);

        for value in 0..1000 {
            metrics.histogram(names::CYCLE_DURATION_MS, value as f64);
        }
        assert!(metrics.snapshot().histograms[names::CYCLE_DURATION_MS].count <= MAX_SAMPLES as u64);
    }
}
