use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Factor name must not be empty")]
    EmptyFactor,

    #[error("Correlation {0} is outside [-1, 1]")]
    CorrelationOutOfRange(f64),

    #[error("Correlation value is not finite")]
    NonFiniteCorrelation,

    #[error("Factor pair must name two distinct factors: {0}")]
    SelfPair(String),

    #[error("Invalid preferences: {0}")]
    InvalidPreferences(String),
}

#[derive(Error, Debug, Clone)]
pub enum DetectorError {
    #[error("Shift detector unavailable: {0}")]
    Unavailable(String),

    #[error("Shift detector returned an invalid payload: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug, Clone)]
pub enum NotificationError {
    #[error("Notification channel rejected alert {alert_id}: {reason}")]
    Rejected { alert_id: String, reason: String },

    #[error("Notification channel unreachable: {0}")]
    Unreachable(String),
}
