// =====================================================================================
// SHADOW EVALUATOR TESTS
// =====================================================================================

use monitoring_cell::ShadowEvaluator;
use shared_models::{ShiftCandidate, TuningParameters};

#[test]
fn test_counts_matches_and_differences() {
    let evaluator = ShadowEvaluator::new(10);
    let candidates = vec![
        ShiftCandidate::new("a", "b", 0.9),
        ShiftCandidate::new("c", "d", 0.6),
        ShiftCandidate::new("e", "f", 0.48),
        ShiftCandidate::new("g", "h", 0.2),
    ];

    let comparison = evaluator.evaluate(&candidates, &TuningParameters::new(0.5));

    // Production selects two pairs, shadow (0.45) also picks up 0.48.
    assert_eq!(comparison.matches, 2);
    assert_eq!(comparison.differences, 1);
    assert!((comparison.match_rate - 2.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_production_parameters_are_untouched() {
    let evaluator = ShadowEvaluator::new(10);
    let production = TuningParameters::new(0.5);

    evaluator.evaluate(&[ShiftCandidate::new("a", "b", 0.47)], &production);

    assert_eq!(production, TuningParameters::new(0.5));
}

#[test]
fn test_rolling_window_keeps_recent_runs() {
    let evaluator = ShadowEvaluator::new(2);
    let parameters = TuningParameters::new(0.5);

    evaluator.evaluate(&[ShiftCandidate::new("a", "b", 0.47)], &parameters);
    evaluator.evaluate(&[ShiftCandidate::new("a", "b", 0.9)], &parameters);
    evaluator.evaluate(&[ShiftCandidate::new("c", "d", 0.9)], &parameters);

    let stats = evaluator.stats();
    assert_eq!(stats.runs, 3);
    assert_eq!(stats.window_runs, 2);
    assert_eq!(stats.total_comparisons, 2);
    assert_eq!(stats.rolling_match_rate, 1.0);
}

#[test]
fn test_invalid_candidates_are_ignored() {
    let evaluator = ShadowEvaluator::new(5);

    let comparison = evaluator.evaluate(
        &[ShiftCandidate::new("a", "a", 0.9), ShiftCandidate::new("b", "c", f64::NAN)],
        &TuningParameters::new(0.5),
    );

    assert_eq!(comparison.matches + comparison.differences, 0);
}

#[test]
fn test_reset_clears_window_but_not_run_count() {
    let evaluator = ShadowEvaluator::new(5);
    evaluator.evaluate(&[ShiftCandidate::new("a", "b", 0.9)], &TuningParameters::new(0.5));

    evaluator.reset();

    let stats = evaluator.stats();
    assert_eq!(stats.runs, 1);
    assert_eq!(stats.window_runs, 0);
    assert_eq!(stats.rolling_match_rate, 0.0);
}
