// =====================================================================================
// SHADOW EVALUATOR
// =====================================================================================
// Replays each batch against a perturbed copy of the production parameters and
// tracks how often both parameter sets select the same pairs. Purely observational.
// =====================================================================================

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::debug;

use shared_models::{ScoringWeights, ShiftCandidate, TuningParameters};

use crate::services::alerts::passes_threshold;
use crate::models::{ShadowComparison, ShadowStats};

const THRESHOLD_OFFSET: f64 = 0.05;
const CORRELATION_WEIGHT_SHIFT: f64 = 0.1;

pub struct ShadowEvaluator {
    window: usize,
    results: Mutex<VecDeque<ShadowComparison>>,
    runs: AtomicU64,
}

impl ShadowEvaluator {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            results: Mutex::new(VecDeque::new()),
            runs: AtomicU64::new(0),
        }
    }

    /// The experimental parameter set: every threshold lowered by 0.05 and
    /// scoring weight moved toward correlation magnitude.
    pub fn shadow_parameters(production: &TuningParameters) -> TuningParameters {
        let lower = |threshold: f64| (threshold - THRESHOLD_OFFSET).max(0.0);

        let mut shadow = production.clone();
        shadow.default_correlation_threshold = lower(production.default_correlation_threshold);
        for threshold in shadow.league_thresholds.values_mut() {
            *threshold = lower(*threshold);
        }
        shadow.scoring_weights = Self::shadow_weights(production.scoring_weights);
        shadow
    }

    pub fn shadow_weights(production: ScoringWeights) -> ScoringWeights {
        let half_shift = CORRELATION_WEIGHT_SHIFT / 2.0;
        ScoringWeights {
            correlation: production.correlation + CORRELATION_WEIGHT_SHIFT,
            sample_size: (production.sample_size - half_shift).max(0.0),
            accuracy: (production.accuracy - half_shift).max(0.0),
        }
        .normalized()
    }

    /// Compares production and shadow selections for the batch and folds the
    /// result into the rolling window.
    pub fn evaluate(&self, candidates: &[ShiftCandidate], production: &TuningParameters) -> ShadowComparison {
        let shadow = Self::shadow_parameters(production);
        let production_keys = selected_keys(candidates, production);
        let shadow_keys = selected_keys(candidates, &shadow);

        let matches = production_keys.intersection(&shadow_keys).count();
        let differences = production_keys.symmetric_difference(&shadow_keys).count();
        let comparison = ShadowComparison {
            matches,
            differences,
            match_rate: match_rate(matches, differences),
        };

        self.runs.fetch_add(1, Ordering::Relaxed);
        let mut results = self.results.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        results.push_back(comparison.clone());
        while results.len() > self.window {
            results.pop_front();
        }

        debug!(matches, differences, "Shadow evaluation complete");
        comparison
    }

    pub fn stats(&self) -> ShadowStats {
        let results = self.results.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let matches: usize = results.iter().map(|r| r.matches).sum();
        let differences: usize = results.iter().map(|r| r.differences).sum();

        ShadowStats {
            runs: self.runs.load(Ordering::Relaxed),
            window_runs: results.len(),
            total_comparisons: (matches + differences) as u64,
            rolling_match_rate: if results.is_empty() { 0.0 } else { match_rate(matches, differences) },
            last: results.back().cloned(),
        }
    }

    pub fn reset(&self) {
        self.results.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }
}

fn selected_keys(candidates: &[ShiftCandidate], parameters: &TuningParameters) -> BTreeSet<String> {
    candidates
        .iter()
        .filter(|candidate| candidate.validate().is_ok() && passes_threshold(candidate, parameters))
        .map(ShiftCandidate::pair_key)
        .collect()
}

fn match_rate(matches: usize, differences: usize) -> f64 {
    let total = matches + differences;
    if total == 0 {
        1.0
    } else {
        matches as f64 / total as f64
    }
}
