// =====================================================================================
// SELF-TUNING CONTROLLER
// =====================================================================================

use std::sync::{Arc, RwLock};

use tracing::{info, instrument, warn};

use shared_config::TuningConfig;
use shared_database::PersistentStore;
use shared_models::TuningParameters;

use crate::collaborators::MetricsSink;
use crate::services::accuracy::AccuracyHistory;
use crate::services::metrics::names;
use crate::services::shadow::ShadowEvaluator;

/// Holder of the process-wide parameter set. Readers take an `Arc` snapshot;
/// writers swap the whole value.
#[derive(Debug)]
pub struct ParameterStore {
    current: RwLock<Arc<TuningParameters>>,
}

impl ParameterStore {
    pub fn new(initial: TuningParameters) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn snapshot(&self) -> Arc<TuningParameters> {
        self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Installs `next` with a version one above the current one.
    pub fn replace(&self, mut next: TuningParameters) -> Arc<TuningParameters> {
        let mut current = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        next.version = current.version + 1;
        let next = Arc::new(next);
        *current = next.clone();
        next
    }
}

#[derive(Debug, Clone)]
pub enum TuningOutcome {
    Skipped { records: usize },
    Applied {
        previous_version: u64,
        parameters: Arc<TuningParameters>,
        adjusted_leagues: Vec<String>,
        blended_shadow: bool,
    },
}

pub struct SelfTuningController {
    config: TuningConfig,
    parameters: Arc<ParameterStore>,
    history: Arc<AccuracyHistory>,
    shadow: Arc<ShadowEvaluator>,
    persistent: Option<Arc<dyn PersistentStore>>,
    metrics: Arc<dyn MetricsSink>,
}

impl SelfTuningController {
    pub fn new(
        config: TuningConfig,
        parameters: Arc<ParameterStore>,
        history: Arc<AccuracyHistory>,
        shadow: Arc<ShadowEvaluator>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            parameters,
            history,
            shadow,
            persistent: None,
            metrics,
        }
    }

    pub fn with_persistent_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.persistent = Some(store);
        self
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> TuningOutcome {
        let records = self.history.len();
        if records < self.config.min_history {
            info!(records, required = self.config.min_history, "Not enough accuracy history, skipping tuning");
            self.metrics.increment(names::TUNING_SKIPPED, 1);
            return TuningOutcome::Skipped { records };
        }

        let current = self.parameters.snapshot();
        let mut next = (*current).clone();
        let mut adjusted_leagues = Vec::new();

        let mut leagues: Vec<_> = self.history.by_league().into_iter().collect();
        leagues.sort_by(|a, b| a.0.cmp(&b.0));
        for (league, accuracy) in leagues {
            if accuracy.samples < self.config.min_league_samples {
                continue;
            }
            let baseline = current.threshold_for(Some(&league));
            let adjusted = self.adjust_threshold(baseline, accuracy.mean);
            if (adjusted - baseline).abs() > f64::EPSILON {
                info!(league = %league, mean = accuracy.mean, from = baseline, to = adjusted, "League threshold adjusted");
                adjusted_leagues.push(league.clone());
            }
            next.league_thresholds.insert(league, adjusted);
        }

        if let Some(mean) = self.history.overall_mean() {
            next.default_correlation_threshold = self.adjust_threshold(current.default_correlation_threshold, mean);
        }

        let blended_shadow = self.blend_shadow_weights(&mut next);
        let parameters = self.parameters.replace(next);
        self.metrics.increment(names::TUNING_RUNS, 1);
        info!(version = parameters.version, "Tuning parameters replaced");

        if let Some(store) = &self.persistent {
            if let Err(e) = store.archive_parameters(&parameters).await {
                warn!(version = parameters.version, "Failed to archive tuning parameters: {}", e);
            }
        }

        TuningOutcome::Applied {
            previous_version: current.version,
            parameters,
            adjusted_leagues,
            blended_shadow,
        }
    }

    /// Low accuracy raises the bar, high accuracy lowers it, anything in
    /// between moves proportionally toward the target.
    pub fn adjust_threshold(&self, current: f64, mean_accuracy: f64) -> f64 {
        let step = self.config.threshold_step;
        let next = if mean_accuracy < 0.6 {
            current + step
        } else if mean_accuracy > 0.8 {
            current - step
        } else {
            let pull = ((self.config.target_accuracy - mean_accuracy) / 0.1).clamp(-1.0, 1.0);
            current + step * pull
        };

        round4(next.clamp(self.config.min_threshold, self.config.max_threshold))
    }

    fn blend_shadow_weights(&self, next: &mut TuningParameters) -> bool {
        let stats = self.shadow.stats();
        let favorable = stats.total_comparisons >= self.config.shadow_min_comparisons
            && stats.rolling_match_rate >= self.config.shadow_favorable_match_rate;
        if !favorable {
            return false;
        }

        let shadow_weights = ShadowEvaluator::shadow_weights(next.scoring_weights);
        next.scoring_weights = next
            .scoring_weights
            .blend(shadow_weights, self.config.shadow_blend_fraction);
        self.shadow.reset();
        info!(match_rate = stats.rolling_match_rate, "Blended shadow scoring weights into production");
        true
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
