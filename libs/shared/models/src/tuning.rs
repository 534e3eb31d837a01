use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub correlation: f64,
    pub sample_size: f64,
    pub accuracy: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            correlation: 0.5,
            sample_size: 0.3,
            accuracy: 0.2,
        }
    }
}

impl ScoringWeights {
    /// Rescales the weights so they sum to 1.
    pub fn normalized(self) -> Self {
        let total = self.correlation + self.sample_size + self.accuracy;
        if total <= f64::EPSILON || !total.is_finite() {
            return Self::default();
        }
        Self {
            correlation: self.correlation / total,
            sample_size: self.sample_size / total,
            accuracy: self.accuracy / total,
        }
    }

    /// Linear blend: `self * (1 - fraction) + other * fraction`.
    pub fn blend(self, other: ScoringWeights, fraction: f64) -> Self {
        let fraction = fraction.clamp(0.0, 1.0);
        let mix = |a: f64, b: f64| a * (1.0 - fraction) + b * fraction;
        Self {
            correlation: mix(self.correlation, other.correlation),
            sample_size: mix(self.sample_size, other.sample_size),
            accuracy: mix(self.accuracy, other.accuracy),
        }
        .normalized()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningParameters {
    pub default_correlation_threshold: f64,
    pub league_thresholds: HashMap<String, f64>,
    pub anomaly_thresholds: HashMap<String, f64>,
    pub scoring_weights: ScoringWeights,
    pub version: u64,
}

impl TuningParameters {
    pub fn new(default_correlation_threshold: f64) -> Self {
        Self {
            default_correlation_threshold,
            league_thresholds: HashMap::new(),
            anomaly_thresholds: HashMap::new(),
            scoring_weights: ScoringWeights::default(),
            version: 1,
        }
    }

    pub fn threshold_for(&self, league: Option<&str>) -> f64 {
        league
            .and_then(|league| self.league_thresholds.get(league))
            .copied()
            .unwrap_or(self.default_correlation_threshold)
    }
}

impl Default for TuningParameters {
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyRecord {
    pub league: String,
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

impl AccuracyRecord {
    pub fn new(league: impl Into<String>, accuracy: f64) -> Self {
        Self {
            league: league.into(),
            accuracy: accuracy.clamp(0.0, 1.0),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_league_threshold_falls_back_to_default() {
        let mut params = TuningParameters::new(0.5);
        params.league_thresholds.insert("nba".to_string(), 0.65);

        assert_eq!(params.threshold_for(Some("nba")), 0.65);
        assert_eq!(params.threshold_for(Some("nfl")), 0.5);
        assert_eq!(params.threshold_for(None), 0.5);
    }

    #[test]
    fn test_blend_stays_normalized() {
        let shadow = ScoringWeights {
            correlation: 0.7,
            sample_size: 0.2,
            accuracy: 0.1,
        };
        let blended = ScoringWeights::default().blend(shadow, 0.2);
        let total = blended.correlation + blended.sample_size + blended.accuracy;

        assert!((total - 1.0).abs() < 1e-9);
        assert!((blended.correlation - 0.54).abs() < 1e-9);
    }
}
