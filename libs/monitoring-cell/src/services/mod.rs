pub mod accuracy;
pub mod alerts;
pub mod event_bus;
pub mod health;
pub mod metrics;
pub mod recovery;
pub mod scheduler;
pub mod shadow;
pub mod throttle;
pub mod tuning;

pub use accuracy::{AccuracyHistory, LeagueAccuracy};
pub use alerts::{AlertPipeline, OpportunityAssessor};
pub use event_bus::EventBus;
pub use health::{
    BreakerProbe, HealthAggregator, HealthProbe, PersistentStoreProbe, ProbeCycle, ProbeReport, ResourceProbe,
    SchedulerProbe, SharedStoreProbe,
};
pub use metrics::MetricsCollectorService;
pub use recovery::{
    FullReinitialization, ReconnectPersistentStore, ReconnectSharedStore, RecoveryAction, RecoveryOrchestrator,
    RecoveryOutcome, RestartComponents,
};
pub use scheduler::{MonitoringScheduler, SchedulerParts, TickOutcome};
pub use shadow::ShadowEvaluator;
pub use throttle::{AdaptiveThrottleController, ThrottleAdjustment};
pub use tuning::{ParameterStore, SelfTuningController, TuningOutcome};
