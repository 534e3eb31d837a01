// =====================================================================================
// MONITORING CELL MODELS
// =====================================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use resilience_cell::BreakerStats;
use shared_models::{Alert, AlertPriority, AlertType, HealthState, ValidationError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub mean: f64,
    pub p95: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
    pub uptime_seconds: u64,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).copied()
    }
}

/// Per-subscriber alert filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPreferences {
    pub min_priority: AlertPriority,
    /// Empty means every league.
    #[serde(default)]
    pub leagues: Vec<String>,
    #[serde(default)]
    pub opportunities_only: bool,
    #[serde(default = "default_include_system")]
    pub include_system: bool,
    #[serde(default)]
    pub max_alerts_per_hour: Option<u32>,
}

fn default_include_system() -> bool {
    true
}

impl Default for AlertPreferences {
    fn default() -> Self {
        Self {
            min_priority: AlertPriority::Low,
            leagues: Vec::new(),
            opportunities_only: false,
            include_system: true,
            max_alerts_per_hour: None,
        }
    }
}

impl AlertPreferences {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.leagues.iter().any(|league| league.trim().is_empty()) {
            return Err(ValidationError::InvalidPreferences("league names must not be blank".to_string()));
        }
        if self.max_alerts_per_hour == Some(0) {
            return Err(ValidationError::InvalidPreferences(
                "max_alerts_per_hour must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn accepts(&self, alert: &Alert) -> bool {
        if alert.alert_type == AlertType::System {
            return self.include_system;
        }
        if alert.priority < self.min_priority {
            return false;
        }
        if self.opportunities_only && alert.alert_type != AlertType::Opportunity {
            return false;
        }
        if self.leagues.is_empty() {
            return true;
        }
        alert
            .league()
            .is_some_and(|league| self.leagues.iter().any(|wanted| wanted.eq_ignore_ascii_case(league)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleTier {
    Normal,
    Light,
    Moderate,
    Heavy,
    Severe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleState {
    pub load_score: f64,
    pub admission_rate: f64,
    pub tier: ThrottleTier,
    pub updated_at: DateTime<Utc>,
}

impl Default for ThrottleState {
    fn default() -> Self {
        Self {
            load_score: 0.0,
            admission_rate: 1.0,
            tier: ThrottleTier::Normal,
            updated_at: Utc::now(),
        }
    }
}

/// Outcome counts for one batch of candidates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub received: usize,
    pub invalid: usize,
    pub below_threshold: usize,
    pub duplicates: usize,
    pub throttled: usize,
    pub failed: usize,
    pub notifications_sent: usize,
    pub notification_failures: usize,
    pub alerts: Vec<Alert>,
}

impl PipelineReport {
    pub fn emitted(&self) -> usize {
        self.alerts.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShadowComparison {
    pub matches: usize,
    pub differences: usize,
    pub match_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShadowStats {
    pub runs: u64,
    pub window_runs: usize,
    pub total_comparisons: u64,
    pub rolling_match_rate: f64,
    pub last: Option<ShadowComparison>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthEventKind {
    Degraded,
    Critical,
    Recovered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthEvent {
    pub kind: HealthEventKind,
    pub previous: HealthState,
    pub current: HealthState,
    /// Components reporting worse than healthy.
    pub components: Vec<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub candidates: usize,
    pub coordinated: bool,
    pub parameters_version: u64,
    pub shadow: Option<ShadowComparison>,
    pub pipeline: PipelineReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub running: bool,
    pub active_jobs: usize,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub ticks_throttled: u64,
    pub ticks_contended: u64,
    pub average_cycle_ms: f64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl SchedulerStats {
    pub fn error_rate(&self) -> f64 {
        let total = self.cycles_completed + self.cycles_failed;
        if total == 0 {
            0.0
        } else {
            self.cycles_failed as f64 / total as f64
        }
    }
}

/// Everything `MonitoringCore::get_metrics` reports.
#[derive(Debug, Clone, Serialize)]
pub struct CoreMetrics {
    pub metrics: MetricsSnapshot,
    pub scheduler: SchedulerStats,
    pub throttle: ThrottleState,
    pub shadow: ShadowStats,
    pub breakers: Vec<BreakerStats>,
    pub parameters_version: u64,
    pub degraded_mode: bool,
}
