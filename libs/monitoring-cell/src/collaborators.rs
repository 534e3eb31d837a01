//! Seams to the systems the monitor depends on but does not own.

use async_trait::async_trait;

use shared_models::{Alert, DetectOptions, DetectorError, NotificationError, ShiftCandidate};

use crate::error::MonitoringError;

/// Source of correlation shift candidates.
#[async_trait]
pub trait ShiftDetector: Send + Sync {
    async fn detect(&self, options: DetectOptions) -> Result<Vec<ShiftCandidate>, DetectorError>;
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    fn channel(&self) -> &str;

    async fn send(&self, alert: &Alert, recipient: &str) -> Result<(), NotificationError>;
}

/// Push-based metrics. Implementations must not block.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str, by: u64);

    fn gauge(&self, name: &str, value: f64);

    fn histogram(&self, name: &str, value: f64);
}

pub trait ResourceSampler: Send + Sync {
    /// Used memory as a fraction of total, `None` when it cannot be sampled.
    fn memory_usage_ratio(&self) -> Option<f64>;
}

pub trait RateLimitSink: Send + Sync {
    fn set_admission_rate(&self, rate: f64);
}

/// A stateful piece of the subsystem that recovery can bounce.
#[async_trait]
pub trait ManagedComponent: Send + Sync {
    fn name(&self) -> &str;

    async fn stop(&self) -> Result<(), MonitoringError>;

    async fn start(&self) -> Result<(), MonitoringError>;
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Market-implied edge for the pair in `[0, 1]`, if the market prices it.
    async fn market_edge(&self, candidate: &ShiftCandidate) -> Option<f64>;
}

/// Rate sink that discards the value.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRateLimitSink;

impl RateLimitSink for NoopRateLimitSink {
    fn set_admission_rate(&self, _rate: f64) {}
}
