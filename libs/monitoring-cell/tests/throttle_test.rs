// =====================================================================================
// ADAPTIVE THROTTLE TESTS
// =====================================================================================

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FixedSampler, RecordingRateSink};
use monitoring_cell::services::metrics::names;
use monitoring_cell::services::throttle::{admission_for, load_score, LoadInputs};
use monitoring_cell::{AdaptiveThrottleController, ManagedComponent, MetricsCollectorService, ThrottleTier};
use shared_models::{AlertPriority, AlertType};

fn controller(memory: Option<f64>) -> (AdaptiveThrottleController, Arc<FixedSampler>, Arc<RecordingRateSink>, Arc<MetricsCollectorService>) {
    let sampler = Arc::new(FixedSampler::new(memory));
    let sink = Arc::new(RecordingRateSink::default());
    let metrics = Arc::new(MetricsCollectorService::new());
    let controller = AdaptiveThrottleController::new(sampler.clone(), sink.clone(), metrics.clone());
    (controller, sampler, sink, metrics)
}

#[test]
fn test_heavy_load_cuts_admission() {
    let (controller, _, sink, metrics) = controller(Some(0.85));
    let period = Duration::from_secs(300);

    let adjustment = controller.adjust(period, period, 0.0);

    // 0.4*85 + 0.4*100 = 74
    assert!((adjustment.state.load_score - 74.0).abs() < 1e-9);
    assert!(adjustment.state.admission_rate <= 0.2);
    assert_eq!(adjustment.state.tier, ThrottleTier::Heavy);
    assert_eq!(sink.last(), Some(0.2));
    assert_eq!(metrics.gauge_value(names::THROTTLE_ADMISSION_RATE), Some(0.2));
}

#[test]
fn test_idle_system_admits_everything() {
    let (controller, _, _, _) = controller(Some(0.2));

    let adjustment = controller.adjust(Duration::from_secs(1), Duration::from_secs(300), 0.0);

    assert_eq!(adjustment.state.admission_rate, 1.0);
    assert_eq!(adjustment.state.tier, ThrottleTier::Normal);
    assert!(adjustment.alert.is_none());
}

#[test]
fn test_unsampled_memory_counts_as_zero() {
    let inputs = LoadInputs {
        memory_ratio: None,
        average_cycle: Duration::from_secs(60),
        period: Duration::from_secs(60),
        error_rate: 0.05,
    };
    // 0.4*100 + 0.2*50
    assert!((load_score(&inputs) - 50.0).abs() < 1e-9);
    assert_eq!(admission_for(50.0), (0.9, ThrottleTier::Light));
}

#[test]
fn test_alert_only_when_rate_drops_below_half() {
    let (controller, sampler, _, _) = controller(Some(0.99));
    let period = Duration::from_secs(60);

    let first = controller.adjust(period, period, 1.0);
    let alert = first.alert.expect("severe throttling alerts");
    assert_eq!(alert.alert_type, AlertType::System);
    assert_eq!(alert.priority, AlertPriority::Critical);

    // Same level again: no repeat.
    assert!(controller.adjust(period, period, 1.0).alert.is_none());

    sampler.set(Some(0.1));
    let recovered = controller.adjust(Duration::ZERO, period, 0.0);
    assert!(recovered.alert.is_none());
    assert_eq!(recovered.state.admission_rate, 1.0);
}

#[test]
fn test_moderate_tier_does_not_alert() {
    let (controller, _, _, _) = controller(Some(0.6));
    let period = Duration::from_secs(60);

    // 0.4*60 + 0.4*100 = 64
    let adjustment = controller.adjust(period, period, 0.0);

    assert_eq!(adjustment.state.admission_rate, 0.5);
    assert!(adjustment.alert.is_none());
}

#[tokio::test]
async fn test_restart_resets_admission() {
    let (controller, _, sink, _) = controller(Some(0.99));
    let period = Duration::from_secs(60);
    controller.adjust(period, period, 1.0);
    assert_eq!(controller.admission_rate(), 0.1);

    controller.stop().await.unwrap();
    controller.start().await.unwrap();

    assert_eq!(controller.admission_rate(), 1.0);
    assert_eq!(sink.last(), Some(1.0));
}
