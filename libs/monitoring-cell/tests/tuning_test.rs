// =====================================================================================
// SELF-TUNING CONTROLLER TESTS
// =====================================================================================

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use monitoring_cell::services::metrics::names;
use monitoring_cell::services::{AccuracyHistory, ParameterStore, TuningOutcome};
use monitoring_cell::{MetricsCollectorService, SelfTuningController, ShadowEvaluator};
use shared_config::TuningConfig;
use shared_database::MemoryPersistentStore;
use shared_models::{AccuracyRecord, ScoringWeights, ShiftCandidate, TuningParameters};

struct Fixture {
    controller: SelfTuningController,
    parameters: Arc<ParameterStore>,
    history: Arc<AccuracyHistory>,
    shadow: Arc<ShadowEvaluator>,
    metrics: Arc<MetricsCollectorService>,
}

fn fixture(config: TuningConfig, initial: TuningParameters) -> Fixture {
    let parameters = Arc::new(ParameterStore::new(initial));
    let history = Arc::new(AccuracyHistory::new(10_000, Duration::from_secs(30 * 24 * 3600)));
    let shadow = Arc::new(ShadowEvaluator::new(50));
    let metrics = Arc::new(MetricsCollectorService::new());
    let controller = SelfTuningController::new(
        config,
        parameters.clone(),
        history.clone(),
        shadow.clone(),
        metrics.clone(),
    );
    Fixture {
        controller,
        parameters,
        history,
        shadow,
        metrics,
    }
}

fn record_many(history: &AccuracyHistory, league: &str, accuracy: f64, count: usize) {
    for _ in 0..count {
        history.record(AccuracyRecord::new(league, accuracy));
    }
}

#[tokio::test]
async fn test_low_accuracy_raises_threshold_one_step() {
    let f = fixture(TuningConfig::default(), TuningParameters::new(0.5));
    record_many(&f.history, "nba", 0.55, 60);

    let outcome = f.controller.run().await;

    let parameters = assert_matches!(outcome, TuningOutcome::Applied { parameters, .. } => parameters);
    assert!((parameters.default_correlation_threshold - 0.55).abs() < 1e-9);
    assert!((parameters.league_thresholds["nba"] - 0.55).abs() < 1e-9);
    assert_eq!(parameters.version, 2);
    assert_eq!(f.parameters.snapshot().version, 2);
    assert_eq!(f.metrics.counter(names::TUNING_RUNS), 1);
}

#[tokio::test]
async fn test_high_accuracy_lowers_threshold_within_bounds() {
    let f = fixture(TuningConfig::default(), TuningParameters::new(0.32));
    record_many(&f.history, "nfl", 0.95, 60);

    f.controller.run().await;

    let parameters = f.parameters.snapshot();
    assert!((parameters.default_correlation_threshold - 0.3).abs() < 1e-9);
    assert!((parameters.league_thresholds["nfl"] - 0.3).abs() < 1e-9);
}

#[tokio::test]
async fn test_threshold_never_exceeds_ceiling() {
    let f = fixture(TuningConfig::default(), TuningParameters::new(0.88));
    record_many(&f.history, "mlb", 0.1, 60);

    f.controller.run().await;

    assert!((f.parameters.snapshot().default_correlation_threshold - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn test_insufficient_history_skips() {
    let f = fixture(TuningConfig::default(), TuningParameters::new(0.5));
    record_many(&f.history, "nba", 0.2, 49);

    let outcome = f.controller.run().await;

    assert_matches!(outcome, TuningOutcome::Skipped { records: 49 });
    assert_eq!(f.parameters.snapshot().version, 1);
    assert_eq!(f.metrics.counter(names::TUNING_SKIPPED), 1);
}

#[tokio::test]
async fn test_sparse_leagues_keep_their_threshold() {
    let f = fixture(TuningConfig::default(), TuningParameters::new(0.5));
    record_many(&f.history, "nba", 0.55, 55);
    record_many(&f.history, "nhl", 0.1, 5);

    let outcome = f.controller.run().await;

    let adjusted = assert_matches!(outcome, TuningOutcome::Applied { adjusted_leagues, .. } => adjusted_leagues);
    assert_eq!(adjusted, vec!["nba".to_string()]);
    assert!(!f.parameters.snapshot().league_thresholds.contains_key("nhl"));
}

#[test]
fn test_mid_band_moves_toward_target() {
    let f = fixture(TuningConfig::default(), TuningParameters::new(0.5));

    // Target 0.7: at 0.75 the pull is -0.5 of a step.
    assert!((f.controller.adjust_threshold(0.5, 0.75) - 0.475).abs() < 1e-9);
    assert!((f.controller.adjust_threshold(0.5, 0.7) - 0.5).abs() < 1e-9);
    assert!((f.controller.adjust_threshold(0.5, 0.65) - 0.525).abs() < 1e-9);
}

#[tokio::test]
async fn test_favorable_shadow_results_blend_weights() {
    let f = fixture(TuningConfig::default(), TuningParameters::new(0.5));
    record_many(&f.history, "nba", 0.7, 60);
    let candidates: Vec<ShiftCandidate> = (0..12)
        .map(|i| ShiftCandidate::new(format!("x{}", i), format!("y{}", i), 0.9))
        .collect();
    f.shadow.evaluate(&candidates, &f.parameters.snapshot());

    let outcome = f.controller.run().await;

    let (parameters, blended) = assert_matches!(
        outcome,
        TuningOutcome::Applied { parameters, blended_shadow, .. } => (parameters, blended_shadow)
    );
    assert!(blended);
    assert!(parameters.scoring_weights.correlation > ScoringWeights::default().correlation);
    assert_eq!(f.shadow.stats().window_runs, 0);
}

#[tokio::test]
async fn test_unfavorable_shadow_results_leave_weights() {
    let f = fixture(TuningConfig::default(), TuningParameters::new(0.5));
    record_many(&f.history, "nba", 0.7, 60);
    // Every candidate sits between the shadow and production thresholds.
    let candidates: Vec<ShiftCandidate> = (0..12)
        .map(|i| ShiftCandidate::new(format!("x{}", i), format!("y{}", i), 0.48))
        .collect();
    f.shadow.evaluate(&candidates, &f.parameters.snapshot());

    f.controller.run().await;

    assert_eq!(f.parameters.snapshot().scoring_weights, ScoringWeights::default());
}

#[tokio::test]
async fn test_parameters_are_archived() {
    let persistent = Arc::new(MemoryPersistentStore::new());
    let parameters = Arc::new(ParameterStore::new(TuningParameters::new(0.5)));
    let history = Arc::new(AccuracyHistory::new(1_000, Duration::from_secs(3600)));
    let controller = SelfTuningController::new(
        TuningConfig::default(),
        parameters,
        history.clone(),
        Arc::new(ShadowEvaluator::new(10)),
        Arc::new(MetricsCollectorService::new()),
    )
    .with_persistent_store(persistent.clone());
    record_many(&history, "nba", 0.9, 60);

    controller.run().await;

    let archived = persistent.archived_parameters();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].version, 2);
}

#[tokio::test]
async fn test_archive_failure_keeps_new_parameters() {
    let persistent = Arc::new(MemoryPersistentStore::new());
    persistent.set_available(false);
    let parameters = Arc::new(ParameterStore::new(TuningParameters::new(0.5)));
    let history = Arc::new(AccuracyHistory::new(1_000, Duration::from_secs(3600)));
    let controller = SelfTuningController::new(
        TuningConfig::default(),
        parameters.clone(),
        history.clone(),
        Arc::new(ShadowEvaluator::new(10)),
        Arc::new(MetricsCollectorService::new()),
    )
    .with_persistent_store(persistent);
    record_many(&history, "nba", 0.9, 60);

    controller.run().await;

    assert_eq!(parameters.snapshot().version, 2);
}
