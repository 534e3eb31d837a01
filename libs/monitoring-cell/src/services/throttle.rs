// =====================================================================================
// ADAPTIVE THROTTLE CONTROLLER
// =====================================================================================

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};

use shared_models::{Alert, AlertPriority};

use crate::collaborators::{ManagedComponent, MetricsSink, RateLimitSink, ResourceSampler};
use crate::error::MonitoringError;
use crate::models::{ThrottleState, ThrottleTier};
use crate::services::metrics::names;

const ALERT_BELOW_RATE: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct LoadInputs {
    pub memory_ratio: Option<f64>,
    pub average_cycle: Duration,
    pub period: Duration,
    pub error_rate: f64,
}

/// Weighted load in `[0, 100]`: 40% memory, 40% cycle time over period, 20% errors.
pub fn load_score(inputs: &LoadInputs) -> f64 {
    let memory = (inputs.memory_ratio.unwrap_or(0.0) * 100.0).clamp(0.0, 100.0);
    let cycle = if inputs.period.is_zero() {
        0.0
    } else {
        (inputs.average_cycle.as_secs_f64() / inputs.period.as_secs_f64() * 100.0).clamp(0.0, 100.0)
    };
    let errors = (inputs.error_rate * 1000.0).clamp(0.0, 100.0);

    0.4 * memory + 0.4 * cycle + 0.2 * errors
}

pub fn admission_for(score: f64) -> (f64, ThrottleTier) {
    if score > 80.0 {
        (0.1, ThrottleTier::Severe)
    } else if score > 70.0 {
        (0.2, ThrottleTier::Heavy)
    } else if score > 60.0 {
        (0.5, ThrottleTier::Moderate)
    } else if score > 40.0 {
        (0.9, ThrottleTier::Light)
    } else {
        (1.0, ThrottleTier::Normal)
    }
}

#[derive(Debug, Clone)]
pub struct ThrottleAdjustment {
    pub state: ThrottleState,
    pub alert: Option<Alert>,
}

pub struct AdaptiveThrottleController {
    state: RwLock<ThrottleState>,
    sampler: Arc<dyn ResourceSampler>,
    sink: Arc<dyn RateLimitSink>,
    metrics: Arc<dyn MetricsSink>,
}

impl AdaptiveThrottleController {
    pub fn new(sampler: Arc<dyn ResourceSampler>, sink: Arc<dyn RateLimitSink>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            state: RwLock::new(ThrottleState::default()),
            sampler,
            sink,
            metrics,
        }
    }

    pub fn current(&self) -> ThrottleState {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn admission_rate(&self) -> f64 {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner()).admission_rate
    }

    /// Recomputes the load score, publishes the new admission rate and returns
    /// a system alert when the rate has just dropped below 0.5.
    #[instrument(skip(self))]
    pub fn adjust(&self, average_cycle: Duration, period: Duration, error_rate: f64) -> ThrottleAdjustment {
        let inputs = LoadInputs {
            memory_ratio: self.sampler.memory_usage_ratio(),
            average_cycle,
            period,
            error_rate,
        };
        let score = load_score(&inputs);
        let (rate, tier) = admission_for(score);

        let next = ThrottleState {
            load_score: score,
            admission_rate: rate,
            tier,
            updated_at: Utc::now(),
        };
        let previous_rate = {
            let mut state = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *state, next.clone()).admission_rate
        };

        self.sink.set_admission_rate(rate);
        self.metrics.gauge(names::THROTTLE_LOAD_SCORE, score);
        self.metrics.gauge(names::THROTTLE_ADMISSION_RATE, rate);

        let alert = if rate < ALERT_BELOW_RATE && rate < previous_rate {
            let priority = if rate <= 0.1 {
                AlertPriority::Critical
            } else if rate <= 0.2 {
                AlertPriority::High
            } else {
                AlertPriority::Medium
            };
            warn!(load_score = score, admission_rate = rate, "Throttling alert admission");
            Some(Alert::system(
                priority,
                "Alert admission throttled",
                format!("Load score {:.1} reduced alert admission rate to {:.0}%", score, rate * 100.0),
            ))
        } else {
            if (rate - previous_rate).abs() > f64::EPSILON {
                info!(load_score = score, admission_rate = rate, "Admission rate changed");
            }
            None
        };

        ThrottleAdjustment { state: next, alert }
    }

    /// Returns to full admission.
    pub fn reset(&self) {
        *self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = ThrottleState::default();
        self.sink.set_admission_rate(1.0);
    }
}

#[async_trait]
impl ManagedComponent for AdaptiveThrottleController {
    fn name(&self) -> &str {
        "throttle"
    }

    async fn stop(&self) -> Result<(), MonitoringError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), MonitoringError> {
        self.reset();
        Ok(())
    }
}
