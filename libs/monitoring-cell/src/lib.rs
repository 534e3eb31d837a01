// =====================================================================================
// MONITORING CELL - RESILIENT CORRELATION MONITORING CORE
// =====================================================================================
//
// This cell runs the correlation monitoring loop and keeps it alive:
// - Periodic monitoring cycles with optional cluster-wide coordination
// - Alert pipeline with dedup, priority banding and admission control
// - Health aggregation with edge-triggered recovery
// - Adaptive throttling, shadow evaluation and self-tuning thresholds
//
// =====================================================================================

pub mod adapters;
pub mod collaborators;
pub mod error;
pub mod models;
pub mod monitor;
pub mod services;

// Re-export commonly used types
pub use collaborators::{
    ManagedComponent, MarketDataSource, MetricsSink, NoopRateLimitSink, NotificationSender, RateLimitSink,
    ResourceSampler, ShiftDetector,
};
pub use monitor::{CoreDependencies, MonitoringCore};
pub use error::MonitoringError;
pub use models::{
    AlertPreferences, CoreMetrics, CycleReport, HealthEvent, HealthEventKind, MetricsSnapshot, PipelineReport,
    SchedulerStats, ShadowComparison, ShadowStats, ThrottleState, ThrottleTier,
};

pub use services::{
    AdaptiveThrottleController, AlertPipeline, HealthAggregator, MetricsCollectorService, MonitoringScheduler,
    RecoveryOrchestrator, SelfTuningController, ShadowEvaluator,
};
