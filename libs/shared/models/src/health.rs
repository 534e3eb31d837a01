use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health levels ordered by severity, `Optimal` being the best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Optimal,
    Healthy,
    Degraded,
    AtRisk,
    Critical,
}

impl HealthState {
    pub fn is_at_least_healthy(self) -> bool {
        self <= HealthState::Healthy
    }

    /// Worst state of the iterator, `Optimal` when empty.
    pub fn worst<I>(states: I) -> HealthState
    where
        I: IntoIterator<Item = HealthState>,
    {
        states.into_iter().max().unwrap_or(HealthState::Optimal)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthState::Optimal => "optimal",
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::AtRisk => "at-risk",
            HealthState::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub state: HealthState,
    pub response_time_ms: u64,
    pub message: Option<String>,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub overall: HealthState,
    pub components: Vec<ComponentHealth>,
    pub checked_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

impl HealthStatus {
    pub fn unknown() -> Self {
        Self {
            overall: HealthState::Healthy,
            components: Vec::new(),
            checked_at: Utc::now(),
            uptime_secs: 0,
        }
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_state_wins() {
        let states = [HealthState::Healthy, HealthState::Critical, HealthState::Degraded];
        assert_eq!(HealthState::worst(states), HealthState::Critical);
        assert_eq!(HealthState::worst(Vec::new()), HealthState::Optimal);
    }

    #[test]
    fn test_at_least_healthy() {
        assert!(HealthState::Optimal.is_at_least_healthy());
        assert!(HealthState::Healthy.is_at_least_healthy());
        assert!(!HealthState::Degraded.is_at_least_healthy());
        assert!(!HealthState::Critical.is_at_least_healthy());
    }
}
