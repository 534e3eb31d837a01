pub mod circuit_breaker;
pub mod coordinator;
pub mod error;

pub use circuit_breaker::{
    BreakerEvent, BreakerStats, CircuitBreaker, CircuitBreakerFactory, CircuitBreakerOptions, CircuitState,
    GuardedOperation,
};
pub use coordinator::{DistributedCoordinator, DistributedLock, LockOptions};
pub use error::{BreakerError, CoordinatorError};
