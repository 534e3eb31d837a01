use std::time::Duration;

use thiserror::Error;

use resilience_cell::{BreakerError, CoordinatorError};
use shared_database::StoreError;
use shared_models::{DetectorError, NotificationError, ValidationError};

#[derive(Error, Debug)]
pub enum MonitoringError {
    #[error("Shift detection failed: {0}")]
    Detection(#[from] DetectorError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinatorError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Health probe failed: {0}")]
    Probe(String),

    #[error("Recovery step failed: {0}")]
    Recovery(String),

    #[error("Component error: {0}")]
    Component(String),
}

impl MonitoringError {
    /// Validation failures are rejected locally and never trip a breaker.
    pub fn is_validation(&self) -> bool {
        matches!(self, MonitoringError::Validation(_))
    }
}

impl From<BreakerError<MonitoringError>> for MonitoringError {
    fn from(err: BreakerError<MonitoringError>) -> Self {
        match err {
            BreakerError::Open(name) => MonitoringError::CircuitOpen(name),
            BreakerError::Timeout(limit) => MonitoringError::Timeout(limit),
            BreakerError::Failed(inner) => inner,
        }
    }
}

impl From<BreakerError<NotificationError>> for MonitoringError {
    fn from(err: BreakerError<NotificationError>) -> Self {
        match err {
            BreakerError::Open(name) => MonitoringError::CircuitOpen(name),
            BreakerError::Timeout(limit) => MonitoringError::Timeout(limit),
            BreakerError::Failed(inner) => MonitoringError::Notification(inner),
        }
    }
}

impl From<BreakerError<StoreError>> for MonitoringError {
    fn from(err: BreakerError<StoreError>) -> Self {
        match err {
            BreakerError::Open(name) => MonitoringError::CircuitOpen(name),
            BreakerError::Timeout(limit) => MonitoringError::Timeout(limit),
            BreakerError::Failed(inner) => MonitoringError::Store(inner),
        }
    }
}
