use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("Circuit breaker '{0}' is open")]
    Open(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation failed: {0}")]
    Failed(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BreakerError::Timeout(_))
    }

    /// The operation's own error, if the operation ran and failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Failed(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Lock on '{resource}' is held elsewhere")]
    LockUnavailable { resource: String },

    #[error("Lock on '{resource}' is no longer held")]
    LockLost { resource: String },

    #[error("Coordination store unavailable: {0}")]
    StoreUnavailable(String),
}
