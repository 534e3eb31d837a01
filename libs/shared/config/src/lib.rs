use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub instance_id: String,
    pub redis_url: Option<String>,
    pub redis_fallback_url: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: String,
    pub supabase_fallback_url: Option<String>,
    pub shift_detector_url: Option<String>,
    pub alert_webhook_url: Option<String>,
    pub alert_default_recipient: Option<String>,
    pub monitoring: MonitoringConfig,
    pub alerts: AlertConfig,
    pub coordination: CoordinationConfig,
    pub tuning: TuningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub cycle_interval_ms: u64,
    pub max_concurrent_jobs: usize,
    pub detector_limit: usize,
    pub lookback_hours: u32,
    pub shadow_mode_enabled: bool,
    pub health_check_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub throttle_interval_ms: u64,
    pub tuning_interval_ms: u64,
    pub maintenance_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    pub recovery_step_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub default_correlation_threshold: f64,
    pub alert_throttle_window_ms: u64,
    pub max_alerts_per_minute: u32,
    pub max_alerts_per_recipient_per_hour: u32,
    pub adequate_sample_size: u32,
    pub opportunity_min_confidence: f64,
    pub opportunity_max_age_ms: u64,
    pub market_trust: f64,
    pub dedup_max_entries: usize,
    pub archive_ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    pub enabled: bool,
    pub lock_ttl_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub retry_jitter_ms: u64,
    pub drift_factor: f64,
    pub node_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    pub min_history: usize,
    pub min_league_samples: usize,
    pub threshold_step: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub target_accuracy: f64,
    pub history_max_records: usize,
    pub history_max_age_ms: u64,
    pub shadow_blend_fraction: f64,
    pub shadow_favorable_match_rate: f64,
    pub shadow_min_comparisons: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 300_000,
            max_concurrent_jobs: 1,
            detector_limit: 100,
            lookback_hours: 24,
            shadow_mode_enabled: true,
            health_check_interval_ms: 30_000,
            probe_timeout_ms: 2_000,
            throttle_interval_ms: 60_000,
            tuning_interval_ms: 86_400_000,
            maintenance_interval_ms: 3_600_000,
            shutdown_grace_ms: 10_000,
            recovery_step_timeout_ms: 30_000,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            default_correlation_threshold: 0.5,
            alert_throttle_window_ms: 3_600_000,
            max_alerts_per_minute: 10,
            max_alerts_per_recipient_per_hour: 20,
            adequate_sample_size: 30,
            opportunity_min_confidence: 70.0,
            opportunity_max_age_ms: 900_000,
            market_trust: 0.5,
            dedup_max_entries: 10_000,
            archive_ttl_ms: 604_800_000,
        }
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lock_ttl_ms: 300_000,
            retry_count: 3,
            retry_delay_ms: 200,
            retry_jitter_ms: 100,
            drift_factor: 0.01,
            node_timeout_ms: 250,
        }
    }
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            min_history: 50,
            min_league_samples: 10,
            threshold_step: 0.05,
            min_threshold: 0.3,
            max_threshold: 0.9,
            target_accuracy: 0.7,
            history_max_records: 5_000,
            history_max_age_ms: 30 * 86_400_000,
            shadow_blend_fraction: 0.2,
            shadow_favorable_match_rate: 0.8,
            shadow_min_comparisons: 10,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            instance_id: format!("monitor-{}", uuid::Uuid::new_v4()),
            redis_url: None,
            redis_fallback_url: None,
            supabase_url: None,
            supabase_anon_key: String::new(),
            supabase_fallback_url: None,
            shift_detector_url: None,
            alert_webhook_url: None,
            alert_default_recipient: None,
            monitoring: MonitoringConfig::default(),
            alerts: AlertConfig::default(),
            coordination: CoordinationConfig::default(),
            tuning: TuningConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let monitoring = MonitoringConfig {
            cycle_interval_ms: parse_env("MONITOR_CYCLE_INTERVAL_MS", defaults.monitoring.cycle_interval_ms),
            max_concurrent_jobs: parse_env("MONITOR_MAX_CONCURRENT_JOBS", defaults.monitoring.max_concurrent_jobs),
            detector_limit: parse_env("MONITOR_DETECTOR_LIMIT", defaults.monitoring.detector_limit),
            lookback_hours: parse_env("MONITOR_LOOKBACK_HOURS", defaults.monitoring.lookback_hours),
            shadow_mode_enabled: parse_env("MONITOR_SHADOW_MODE", defaults.monitoring.shadow_mode_enabled),
            health_check_interval_ms: parse_env("MONITOR_HEALTH_INTERVAL_MS", defaults.monitoring.health_check_interval_ms),
            probe_timeout_ms: parse_env("MONITOR_PROBE_TIMEOUT_MS", defaults.monitoring.probe_timeout_ms),
            throttle_interval_ms: parse_env("MONITOR_THROTTLE_INTERVAL_MS", defaults.monitoring.throttle_interval_ms),
            tuning_interval_ms: parse_env("MONITOR_TUNING_INTERVAL_MS", defaults.monitoring.tuning_interval_ms),
            maintenance_interval_ms: parse_env("MONITOR_MAINTENANCE_INTERVAL_MS", defaults.monitoring.maintenance_interval_ms),
            shutdown_grace_ms: parse_env("MONITOR_SHUTDOWN_GRACE_MS", defaults.monitoring.shutdown_grace_ms),
            recovery_step_timeout_ms: parse_env("MONITOR_RECOVERY_STEP_TIMEOUT_MS", defaults.monitoring.recovery_step_timeout_ms),
        };

        let alerts = AlertConfig {
            default_correlation_threshold: parse_env_f64("ALERT_CORRELATION_THRESHOLD", defaults.alerts.default_correlation_threshold),
            alert_throttle_window_ms: parse_env("ALERT_THROTTLE_WINDOW_MS", defaults.alerts.alert_throttle_window_ms),
            max_alerts_per_minute: parse_env("ALERT_MAX_PER_MINUTE", defaults.alerts.max_alerts_per_minute),
            max_alerts_per_recipient_per_hour: parse_env("ALERT_MAX_PER_RECIPIENT_PER_HOUR", defaults.alerts.max_alerts_per_recipient_per_hour),
            adequate_sample_size: parse_env("ALERT_ADEQUATE_SAMPLE_SIZE", defaults.alerts.adequate_sample_size),
            opportunity_min_confidence: parse_env_f64("ALERT_OPPORTUNITY_MIN_CONFIDENCE", defaults.alerts.opportunity_min_confidence),
            opportunity_max_age_ms: parse_env("ALERT_OPPORTUNITY_MAX_AGE_MS", defaults.alerts.opportunity_max_age_ms),
            market_trust: parse_env_f64("ALERT_MARKET_TRUST", defaults.alerts.market_trust),
            dedup_max_entries: parse_env("ALERT_DEDUP_MAX_ENTRIES", defaults.alerts.dedup_max_entries),
            archive_ttl_ms: parse_env("ALERT_ARCHIVE_TTL_MS", defaults.alerts.archive_ttl_ms),
        };

        let coordination = CoordinationConfig {
            enabled: parse_env("LOCK_ENABLED", defaults.coordination.enabled),
            lock_ttl_ms: parse_env("LOCK_TTL_MS", monitoring.cycle_interval_ms),
            retry_count: parse_env("LOCK_RETRY_COUNT", defaults.coordination.retry_count),
            retry_delay_ms: parse_env("LOCK_RETRY_DELAY_MS", defaults.coordination.retry_delay_ms),
            retry_jitter_ms: parse_env("LOCK_RETRY_JITTER_MS", defaults.coordination.retry_jitter_ms),
            drift_factor: parse_env_f64("LOCK_DRIFT_FACTOR", defaults.coordination.drift_factor),
            node_timeout_ms: parse_env("LOCK_NODE_TIMEOUT_MS", defaults.coordination.node_timeout_ms),
        };

        let tuning = TuningConfig {
            min_history: parse_env("TUNING_MIN_HISTORY", defaults.tuning.min_history),
            min_league_samples: parse_env("TUNING_MIN_LEAGUE_SAMPLES", defaults.tuning.min_league_samples),
            threshold_step: parse_env_f64("TUNING_THRESHOLD_STEP", defaults.tuning.threshold_step),
            min_threshold: parse_env_f64("TUNING_MIN_THRESHOLD", defaults.tuning.min_threshold),
            max_threshold: parse_env_f64("TUNING_MAX_THRESHOLD", defaults.tuning.max_threshold),
            target_accuracy: parse_env_f64("TUNING_TARGET_ACCURACY", defaults.tuning.target_accuracy),
            history_max_records: parse_env("TUNING_HISTORY_MAX_RECORDS", defaults.tuning.history_max_records),
            history_max_age_ms: parse_env("TUNING_HISTORY_MAX_AGE_MS", defaults.tuning.history_max_age_ms),
            shadow_blend_fraction: parse_env_f64("TUNING_SHADOW_BLEND_FRACTION", defaults.tuning.shadow_blend_fraction),
            shadow_favorable_match_rate: parse_env_f64("TUNING_SHADOW_FAVORABLE_MATCH_RATE", defaults.tuning.shadow_favorable_match_rate),
            shadow_min_comparisons: parse_env("TUNING_SHADOW_MIN_COMPARISONS", defaults.tuning.shadow_min_comparisons),
        };

        let config = Self {
            instance_id: env::var("MONITOR_INSTANCE_ID").unwrap_or(defaults.instance_id),
            redis_url: optional_env("REDIS_URL"),
            redis_fallback_url: optional_env("REDIS_FALLBACK_URL"),
            supabase_url: optional_env("SUPABASE_URL"),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_fallback_url: optional_env("SUPABASE_FALLBACK_URL"),
            shift_detector_url: optional_env("SHIFT_DETECTOR_URL"),
            alert_webhook_url: optional_env("ALERT_WEBHOOK_URL"),
            alert_default_recipient: optional_env("ALERT_DEFAULT_RECIPIENT"),
            monitoring,
            alerts,
            coordination,
            tuning,
        };

        if !config.is_shared_store_configured() {
            warn!("REDIS_URL not set - dedup, archival and locking stay in-process");
        }

        config
    }

    pub fn is_shared_store_configured(&self) -> bool {
        self.redis_url.as_deref().is_some_and(|url| !url.is_empty())
    }

    pub fn is_persistent_store_configured(&self) -> bool {
        self.supabase_url.as_deref().is_some_and(|url| !url.is_empty())
            && !self.supabase_anon_key.is_empty()
    }
}

impl MonitoringConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn tuning_interval(&self) -> Duration {
        Duration::from_millis(self.tuning_interval_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn recovery_step_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_step_timeout_ms)
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_secs(u64::from(self.lookback_hours) * 3600)
    }
}

impl AlertConfig {
    pub fn alert_throttle_window(&self) -> Duration {
        Duration::from_millis(self.alert_throttle_window_ms)
    }

    pub fn opportunity_max_age(&self) -> Duration {
        Duration::from_millis(self.opportunity_max_age_ms)
    }

    pub fn archive_ttl(&self) -> Duration {
        Duration::from_millis(self.archive_ttl_ms)
    }
}

impl CoordinationConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn retry_jitter(&self) -> Duration {
        Duration::from_millis(self.retry_jitter_ms)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }
}

impl TuningConfig {
    pub fn history_max_age(&self) -> Duration {
        Duration::from_millis(self.history_max_age_ms)
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {:?}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    let value = parse_env(key, default);
    if value.is_finite() {
        value
    } else {
        warn!("{} has non-finite value {}, using default {}", key, value, default);
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let config = AppConfig::default();

        assert!(config.tuning.min_threshold < config.tuning.max_threshold);
        assert!(config.alerts.default_correlation_threshold >= config.tuning.min_threshold);
        assert_eq!(config.monitoring.cycle_interval(), Duration::from_secs(300));
        assert!(!config.is_shared_store_configured());
        assert!(!config.is_persistent_store_configured());
    }

    #[test]
    fn test_parse_env_falls_back_on_garbage() {
        env::set_var("SHARED_CONFIG_TEST_GARBAGE", "not-a-number");
        let value: u64 = parse_env("SHARED_CONFIG_TEST_GARBAGE", 42);
        assert_eq!(value, 42);

        env::set_var("SHARED_CONFIG_TEST_VALID", " 7 ");
        let value: u64 = parse_env("SHARED_CONFIG_TEST_VALID", 42);
        assert_eq!(value, 7);
    }

    #[test]
    fn test_parse_env_f64_rejects_non_finite() {
        for raw in ["NaN", "inf", "-infinity"] {
            env::set_var("SHARED_CONFIG_TEST_NON_FINITE", raw);
            assert_eq!(parse_env_f64("SHARED_CONFIG_TEST_NON_FINITE", 0.5), 0.5, "accepted {}", raw);
        }

        env::set_var("SHARED_CONFIG_TEST_FINITE", "0.65");
        assert_eq!(parse_env_f64("SHARED_CONFIG_TEST_FINITE", 0.5), 0.65);
    }

    #[test]
    fn test_blank_optional_env_is_none() {
        env::set_var("SHARED_CONFIG_TEST_BLANK", "   ");
        assert_eq!(optional_env("SHARED_CONFIG_TEST_BLANK"), None);
    }
}
