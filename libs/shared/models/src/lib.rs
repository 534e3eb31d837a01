pub mod alert;
pub mod error;
pub mod health;
pub mod shift;
pub mod tuning;

pub use alert::{Alert, AlertPriority, AlertType};
pub use error::{DetectorError, NotificationError, ValidationError};
pub use health::{ComponentHealth, HealthState, HealthStatus};
pub use shift::{DetectOptions, ShiftCandidate};
pub use tuning::{AccuracyRecord, ScoringWeights, TuningParameters};
