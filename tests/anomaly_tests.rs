//! Boundary tests for rule evaluation: baseline suppression, gap thresholds,
//! null-ratio bands, and the analyze verdict.

use chrono::{Duration, Utc};
use dataflow_hub::models::AnomalySeverity;
use dataflow_hub::monitor::{AnalysisThresholds, AnomalyEngine, RowSet, TransformKind};

#[test]
fn test_volume_rules_suppressed_below_three_samples() {
    // With fewer than 3 historical samples there is no baseline, so neither
    // spike nor drop can fire.
    assert!(AnomalyEngine::baseline(&[]).is_none());
    assert!(AnomalyEngine::baseline(&[900]).is_none());
    assert!(AnomalyEngine::baseline(&[900, 920]).is_none());
    assert!(AnomalyEngine::baseline(&[900, 920, 910]).is_some());
}

#[test]
fn test_gap_rule_boundaries() {
    let engine = AnomalyEngine::new();
    let now = Utc::now();
    let threshold_minutes = 5;

    // threshold - 1s: no anomaly.
    let just_inside = now - (Duration::minutes(threshold_minutes) - Duration::seconds(1));
    assert!(engine.detect_gap(just_inside, threshold_minutes, now).is_none());

    // threshold + 1s: exactly one anomaly of severity warning.
    let just_outside = now - (Duration::minutes(threshold_minutes) + Duration::seconds(1));
    let anomaly = engine.detect_gap(just_outside, threshold_minutes, now).unwrap();
    assert_eq!(anomaly.kind, "gap_detection");
    assert_eq!(anomaly.severity, AnomalySeverity::Warning);

    // 2*threshold + 1s: critical.
    let far_outside = now - (Duration::minutes(2 * threshold_minutes) + Duration::seconds(1));
    let anomaly = engine.detect_gap(far_outside, threshold_minutes, now).unwrap();
    assert_eq!(anomaly.severity, AnomalySeverity::Critical);
}

#[test]
fn test_null_ratio_band_boundaries() {
    // Exactly at the warning threshold: warning.
    assert_eq!(
        AnomalyEngine::classify_null_ratio(0.05, 0.05, 0.20),
        AnomalySeverity::Warning
    );
    // Strictly below: info.
    assert_eq!(
        AnomalyEngine::classify_null_ratio(0.0499, 0.05, 0.20),
        AnomalySeverity::Info
    );
    // At and above the error threshold: error.
    assert_eq!(
        AnomalyEngine::classify_null_ratio(0.20, 0.05, 0.20),
        AnomalySeverity::Error
    );
    assert_eq!(
        AnomalyEngine::classify_null_ratio(0.35, 0.05, 0.20),
        AnomalySeverity::Error
    );
}

#[test]
fn test_spike_escalation_at_twice_threshold() {
    let engine = AnomalyEngine::new();

    // 3x threshold, baseline 100: 301 events is a warning.
    let warning = engine.detect_volume_spike(301, 100.0, 3.0).unwrap();
    assert_eq!(warning.severity, AnomalySeverity::Warning);

    // At 6x (twice the threshold) it escalates.
    let critical = engine.detect_volume_spike(600, 100.0, 3.0).unwrap();
    assert_eq!(critical.severity, AnomalySeverity::Critical);
}

#[test]
fn test_analyze_verdict_blocks_only_on_errors() {
    let engine = AnomalyEngine::new();
    let thresholds = AnalysisThresholds::default();

    // Warnings and info alone never block.
    let original = RowSet {
        row_count: 100,
        ..Default::default()
    };
    let joined = RowSet {
        row_count: 300,
        ..Default::default()
    };
    let verdict = engine.analyze(&original, &joined, TransformKind::Join, &thresholds);
    assert_eq!(verdict.warnings, 1);
    assert!(verdict.can_proceed);

    // An error-band null ratio blocks.
    let nully = RowSet {
        row_count: 100,
        null_counts: [("email".to_string(), 25)].into_iter().collect(),
        ..Default::default()
    };
    let verdict = engine.analyze(&original, &nully, TransformKind::Join, &thresholds);
    assert!(verdict.errors >= 1);
    assert!(!verdict.can_proceed);
}
