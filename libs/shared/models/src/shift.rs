use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftCandidate {
    pub factor_a: String,
    pub factor_b: String,
    pub current_correlation: f64,
    #[serde(default)]
    pub previous_correlation: Option<f64>,
    #[serde(default)]
    pub league: Option<String>,
    #[serde(default)]
    pub sport: Option<String>,
    #[serde(default)]
    pub sample_size: Option<u32>,
    pub detected_at: DateTime<Utc>,
}

impl ShiftCandidate {
    pub fn new(factor_a: impl Into<String>, factor_b: impl Into<String>, current_correlation: f64) -> Self {
        Self {
            factor_a: factor_a.into(),
            factor_b: factor_b.into(),
            current_correlation,
            previous_correlation: None,
            league: None,
            sport: None,
            sample_size: None,
            detected_at: Utc::now(),
        }
    }

    pub fn with_league(mut self, league: impl Into<String>) -> Self {
        self.league = Some(league.into());
        self
    }

    pub fn with_sample_size(mut self, sample_size: u32) -> Self {
        self.sample_size = Some(sample_size);
        self
    }

    pub fn with_previous(mut self, previous: f64) -> Self {
        self.previous_correlation = Some(previous);
        self
    }

    pub fn detected_at(mut self, at: DateTime<Utc>) -> Self {
        self.detected_at = at;
        self
    }

    /// Order-independent key: `(a, b)` and `(b, a)` map to the same string.
    pub fn pair_key(&self) -> String {
        let (first, second) = if self.factor_a <= self.factor_b {
            (&self.factor_a, &self.factor_b)
        } else {
            (&self.factor_b, &self.factor_a)
        };
        format!("{}|{}", first, second)
    }

    pub fn magnitude(&self) -> f64 {
        self.current_correlation.abs()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.factor_a.trim().is_empty() || self.factor_b.trim().is_empty() {
            return Err(ValidationError::EmptyFactor);
        }
        if self.factor_a == self.factor_b {
            return Err(ValidationError::SelfPair(self.factor_a.clone()));
        }
        if !self.current_correlation.is_finite() {
            return Err(ValidationError::NonFiniteCorrelation);
        }
        if !(-1.0..=1.0).contains(&self.current_correlation) {
            return Err(ValidationError::CorrelationOutOfRange(self.current_correlation));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectOptions {
    pub limit: usize,
    pub lookback: Duration,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            lookback: Duration::from_secs(24 * 3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_is_unordered() {
        let forward = ShiftCandidate::new("home_xg", "away_shots", 0.7);
        let reverse = ShiftCandidate::new("away_shots", "home_xg", 0.2);
        assert_eq!(forward.pair_key(), reverse.pair_key());
        assert_eq!(forward.pair_key(), "away_shots|home_xg");
    }

    #[test]
    fn test_validation_rejects_bad_candidates() {
        assert_eq!(
            ShiftCandidate::new("", "b", 0.5).validate(),
            Err(ValidationError::EmptyFactor)
        );
        assert_eq!(
            ShiftCandidate::new("a", "b", f64::NAN).validate(),
            Err(ValidationError::NonFiniteCorrelation)
        );
        assert_eq!(
            ShiftCandidate::new("a", "b", 1.2).validate(),
            Err(ValidationError::CorrelationOutOfRange(1.2))
        );
        assert!(ShiftCandidate::new("a", "b", -1.0).validate().is_ok());
    }
}
