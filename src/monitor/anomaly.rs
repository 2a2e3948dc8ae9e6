//! Anomaly detection
//!
//! Evaluates live pipeline metrics and transform previews against rule
//! configurations: volume spikes and drops against a moving baseline, event
//! gaps, per-column null ratios, join cardinality explosions, filter
//! row-count drops, and unexpected type coercion.

use crate::models::{Anomaly, AnomalySeverity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Minimum history samples before volume rules fire.
pub const MIN_BASELINE_SAMPLES: usize = 3;
/// Number of recent counts retained per pipeline.
pub const BASELINE_WINDOW: usize = 10;

/// Thresholds for the two-row-set `analyze` verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisThresholds {
    pub null_ratio_warning: f64,
    pub null_ratio_error: f64,
    pub cardinality_multiplier: f64,
    pub row_count_drop_warning: f64,
}

impl Default for AnalysisThresholds {
    fn default() -> Self {
        Self {
            null_ratio_warning: 0.05,
            null_ratio_error: 0.20,
            cardinality_multiplier: 2.0,
            row_count_drop_warning: 0.50,
        }
    }
}

/// Kind of transformation under analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    Join,
    Filter,
    Aggregation,
}

/// A row-set summary fed into `analyze`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowSet {
    pub row_count: i64,
    /// (column name, column type) pairs.
    #[serde(default)]
    pub columns: Vec<(String, String)>,
    /// Per-column null counts.
    #[serde(default)]
    pub null_counts: HashMap<String, i64>,
}

/// Verdict over an original/transformed row-set pair.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisVerdict {
    pub anomalies: Vec<Anomaly>,
    pub errors: usize,
    pub warnings: usize,
    pub info: usize,
    pub can_proceed: bool,
}

/// Stateless anomaly engine.
#[derive(Debug, Default)]
pub struct AnomalyEngine;

impl AnomalyEngine {
    pub fn new() -> Self {
        Self
    }

    /// Moving-mean baseline over prior counts (current excluded). None until
    /// enough samples exist - volume rules stay suppressed that long.
    pub fn baseline(history: &[i64]) -> Option<f64> {
        if history.len() < MIN_BASELINE_SAMPLES {
            return None;
        }
        let prior = &history[..history.len() - 1];
        if prior.is_empty() {
            return None;
        }
        Some(prior.iter().sum::<i64>() as f64 / prior.len() as f64)
    }

    /// Volume spike: current > threshold × baseline. Escalates to critical
    /// when the multiplier reaches twice the threshold.
    pub fn detect_volume_spike(
        &self,
        current_count: i64,
        baseline_count: f64,
        threshold: f64,
    ) -> Option<Anomaly> {
        if baseline_count <= 0.0 {
            return None;
        }

        let multiplier = current_count as f64 / baseline_count;
        if multiplier <= threshold {
            return None;
        }

        let severity = if multiplier < threshold * 2.0 {
            AnomalySeverity::Warning
        } else {
            AnomalySeverity::Critical
        };

        debug!("Volume spike: {} events ({:.1}x baseline)", current_count, multiplier);
        Some(Anomaly {
            kind: "volume_spike".to_string(),
            severity,
            column: None,
            message: format!(
                "Volume spike detected: {current_count} events ({multiplier:.1}x baseline of {baseline_count:.0})"
            ),
            details: serde_json::json!({
                "current_count": current_count,
                "baseline_count": baseline_count,
                "multiplier": multiplier,
                "threshold": threshold,
            }),
            pipeline_id: None,
            pipeline_name: None,
        })
    }

    /// Volume drop: current < threshold × baseline. Escalates to critical
    /// when the ratio falls below half the threshold.
    pub fn detect_volume_drop(
        &self,
        current_count: i64,
        baseline_count: f64,
        threshold: f64,
    ) -> Option<Anomaly> {
        if baseline_count <= 0.0 {
            return None;
        }

        let ratio = current_count as f64 / baseline_count;
        if ratio >= threshold {
            return None;
        }

        let severity = if ratio > threshold / 2.0 {
            AnomalySeverity::Warning
        } else {
            AnomalySeverity::Critical
        };

        let drop_percent = (1.0 - ratio) * 100.0;
        debug!("Volume drop: {} events ({:.0}% drop)", current_count, drop_percent);
        Some(Anomaly {
            kind: "volume_drop".to_string(),
            severity,
            column: None,
            message: format!(
                "Volume drop detected: {current_count} events ({drop_percent:.0}% drop from baseline of {baseline_count:.0})"
            ),
            details: serde_json::json!({
                "current_count": current_count,
                "baseline_count": baseline_count,
                "ratio": ratio,
                "drop_percent": drop_percent,
                "threshold": threshold,
            }),
            pipeline_id: None,
            pipeline_name: None,
        })
    }

    /// Event gap: age of the last event reaches the threshold. Twice the
    /// threshold escalates to critical.
    pub fn detect_gap(
        &self,
        last_event_time: DateTime<Utc>,
        gap_threshold_minutes: i64,
        now: DateTime<Utc>,
    ) -> Option<Anomaly> {
        let gap_seconds = (now - last_event_time).num_seconds();
        let gap_minutes = gap_seconds as f64 / 60.0;
        let threshold = gap_threshold_minutes as f64;

        if gap_minutes < threshold {
            return None;
        }

        let severity = if gap_minutes >= threshold * 2.0 {
            AnomalySeverity::Critical
        } else {
            AnomalySeverity::Warning
        };

        debug!("Event gap: {:.1} minutes since last event", gap_minutes);
        Some(Anomaly {
            kind: "gap_detection".to_string(),
            severity,
            column: None,
            message: format!(
                "Event gap detected: no events for {gap_minutes:.1} minutes (threshold: {gap_threshold_minutes} min)"
            ),
            details: serde_json::json!({
                "gap_minutes": gap_minutes,
                "gap_seconds": gap_seconds,
                "threshold_minutes": gap_threshold_minutes,
                "last_event_time": last_event_time,
            }),
            pipeline_id: None,
            pipeline_name: None,
        })
    }

    /// Severity classification for a null ratio against warning/error bands.
    pub fn classify_null_ratio(ratio: f64, warning: f64, error: f64) -> AnomalySeverity {
        if ratio >= error {
            AnomalySeverity::Error
        } else if ratio >= warning {
            AnomalySeverity::Warning
        } else {
            AnomalySeverity::Info
        }
    }

    /// Null-ratio anomaly for one column; None below the warning band.
    pub fn check_null_ratio(
        &self,
        column: &str,
        null_count: i64,
        row_count: i64,
        warning: f64,
        error: f64,
    ) -> Option<Anomaly> {
        if row_count <= 0 {
            return None;
        }
        let ratio = null_count as f64 / row_count as f64;
        let severity = Self::classify_null_ratio(ratio, warning, error);
        if severity == AnomalySeverity::Info {
            return None;
        }

        let threshold = if severity == AnomalySeverity::Error { error } else { warning };
        Some(Anomaly {
            kind: "null_ratio".to_string(),
            severity,
            column: Some(column.to_string()),
            message: format!(
                "Column '{}' has {:.1}% NULL values (threshold: {:.1}%)",
                column,
                ratio * 100.0,
                threshold * 100.0
            ),
            details: serde_json::json!({
                "null_count": null_count,
                "total_rows": row_count,
                "null_ratio": ratio,
            }),
            pipeline_id: None,
            pipeline_name: None,
        })
    }

    /// Evaluate a transform template's anomaly configuration against live
    /// metrics. Each block (`volume_spike`, `volume_drop`, `gap_detection`)
    /// applies only when enabled.
    pub fn evaluate_template_config(
        &self,
        current_count: i64,
        baseline_count: Option<f64>,
        last_event_time: Option<DateTime<Utc>>,
        config: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        let enabled = |block: &str| {
            config
                .get(block)
                .and_then(|b| b.get("enabled"))
                .and_then(|e| e.as_bool())
                .unwrap_or(false)
        };
        let setting = |block: &str, key: &str, default: f64| {
            config
                .get(block)
                .and_then(|b| b.get(key))
                .and_then(|v| v.as_f64())
                .unwrap_or(default)
        };

        if enabled("volume_spike") {
            if let Some(baseline) = baseline_count {
                let multiplier = setting("volume_spike", "multiplier", 3.0);
                if let Some(anomaly) = self.detect_volume_spike(current_count, baseline, multiplier)
                {
                    anomalies.push(anomaly);
                }
            }
        }

        if enabled("volume_drop") {
            if let Some(baseline) = baseline_count {
                let threshold = setting("volume_drop", "threshold", 0.2);
                if let Some(anomaly) = self.detect_volume_drop(current_count, baseline, threshold) {
                    anomalies.push(anomaly);
                }
            }
        }

        if enabled("gap_detection") {
            if let Some(last) = last_event_time {
                let minutes = setting("gap_detection", "minutes", 5.0) as i64;
                if let Some(anomaly) = self.detect_gap(last, minutes, now) {
                    anomalies.push(anomaly);
                }
            }
        }

        anomalies
    }

    /// Analyze a transformed row set against the original. The verdict's
    /// `can_proceed` is false exactly when errors were found.
    pub fn analyze(
        &self,
        original: &RowSet,
        transformed: &RowSet,
        kind: TransformKind,
        thresholds: &AnalysisThresholds,
    ) -> AnalysisVerdict {
        let mut anomalies = Vec::new();

        // 1. Null ratios in the transformed set.
        for (column, null_count) in &transformed.null_counts {
            if let Some(anomaly) = self.check_null_ratio(
                column,
                *null_count,
                transformed.row_count,
                thresholds.null_ratio_warning,
                thresholds.null_ratio_error,
            ) {
                anomalies.push(anomaly);
            }
        }

        // 2. Cardinality explosion (joins).
        if kind == TransformKind::Join && original.row_count > 0 {
            let ratio = transformed.row_count as f64 / original.row_count as f64;
            if ratio > thresholds.cardinality_multiplier {
                anomalies.push(Anomaly {
                    kind: "cardinality".to_string(),
                    severity: AnomalySeverity::Warning,
                    column: None,
                    message: format!(
                        "JOIN produced {ratio:.2}x more rows than original (threshold: {}x). Possible cartesian product.",
                        thresholds.cardinality_multiplier
                    ),
                    details: serde_json::json!({
                        "original_rows": original.row_count,
                        "output_rows": transformed.row_count,
                        "cardinality_ratio": ratio,
                    }),
                    pipeline_id: None,
                    pipeline_name: None,
                });
            }
        }

        // 3. Row-count drop (filters).
        if kind == TransformKind::Filter && original.row_count > 0 {
            let drop_ratio = 1.0 - transformed.row_count as f64 / original.row_count as f64;
            if drop_ratio > thresholds.row_count_drop_warning {
                anomalies.push(Anomaly {
                    kind: "row_count_drop".to_string(),
                    severity: AnomalySeverity::Info,
                    column: None,
                    message: format!(
                        "FILTER reduced rows by {:.1}% ({} -> {}). Verify the filter condition is correct.",
                        drop_ratio * 100.0,
                        original.row_count,
                        transformed.row_count
                    ),
                    details: serde_json::json!({
                        "original_rows": original.row_count,
                        "output_rows": transformed.row_count,
                        "drop_ratio": drop_ratio,
                    }),
                    pipeline_id: None,
                    pipeline_name: None,
                });
            }
        }

        // 4. Type coercion, except under aggregation where types change by
        // construction.
        if kind != TransformKind::Aggregation && !original.columns.is_empty() {
            let original_types: HashMap<&str, &str> = original
                .columns
                .iter()
                .map(|(n, t)| (n.as_str(), t.as_str()))
                .collect();
            for (name, transformed_type) in &transformed.columns {
                if let Some(original_type) = original_types.get(name.as_str()) {
                    if !original_type.is_empty()
                        && !transformed_type.is_empty()
                        && original_type != transformed_type
                    {
                        anomalies.push(Anomaly {
                            kind: "type_coercion".to_string(),
                            severity: AnomalySeverity::Info,
                            column: Some(name.clone()),
                            message: format!(
                                "Column '{name}' type changed from {original_type} to {transformed_type}"
                            ),
                            details: serde_json::json!({
                                "original_type": original_type,
                                "transformed_type": transformed_type,
                            }),
                            pipeline_id: None,
                            pipeline_name: None,
                        });
                    }
                }
            }
        }

        let errors = anomalies
            .iter()
            .filter(|a| a.severity >= AnomalySeverity::Error)
            .count();
        let warnings = anomalies
            .iter()
            .filter(|a| a.severity == AnomalySeverity::Warning)
            .count();
        let info = anomalies
            .iter()
            .filter(|a| a.severity == AnomalySeverity::Info)
            .count();

        debug!(
            "Analyzed {:?}: {} errors, {} warnings, {} info",
            kind, errors, warnings, info
        );

        AnalysisVerdict {
            anomalies,
            errors,
            warnings,
            info,
            can_proceed: errors == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn engine() -> AnomalyEngine {
        AnomalyEngine::new()
    }

    #[test]
    fn test_baseline_requires_three_samples() {
        assert!(AnomalyEngine::baseline(&[100, 120]).is_none());
        let baseline = AnomalyEngine::baseline(&[100, 120, 500]).unwrap();
        // Mean of the prior counts, current excluded.
        assert!((baseline - 110.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_spike_detection_and_escalation() {
        let e = engine();
        assert!(e.detect_volume_spike(250, 100.0, 3.0).is_none());

        let warning = e.detect_volume_spike(400, 100.0, 3.0).unwrap();
        assert_eq!(warning.severity, AnomalySeverity::Warning);

        let critical = e.detect_volume_spike(700, 100.0, 3.0).unwrap();
        assert_eq!(critical.severity, AnomalySeverity::Critical);
    }

    #[test]
    fn test_drop_detection_and_escalation() {
        let e = engine();
        assert!(e.detect_volume_drop(50, 100.0, 0.2).is_none());

        let warning = e.detect_volume_drop(15, 100.0, 0.2).unwrap();
        assert_eq!(warning.severity, AnomalySeverity::Warning);

        let critical = e.detect_volume_drop(5, 100.0, 0.2).unwrap();
        assert_eq!(critical.severity, AnomalySeverity::Critical);
    }

    #[test]
    fn test_no_volume_anomaly_without_baseline() {
        let e = engine();
        assert!(e.detect_volume_spike(1000, 0.0, 3.0).is_none());
        assert!(e.detect_volume_drop(0, 0.0, 0.2).is_none());
    }

    #[test]
    fn test_gap_boundaries() {
        let e = engine();
        let now = Utc::now();

        // One second inside the threshold: no anomaly.
        let recent = now - Duration::minutes(5) + Duration::seconds(1);
        assert!(e.detect_gap(recent, 5, now).is_none());

        // One second past: warning.
        let late = now - Duration::minutes(5) - Duration::seconds(1);
        let anomaly = e.detect_gap(late, 5, now).unwrap();
        assert_eq!(anomaly.kind, "gap_detection");
        assert_eq!(anomaly.severity, AnomalySeverity::Warning);

        // One second past twice the threshold: critical.
        let very_late = now - Duration::minutes(10) - Duration::seconds(1);
        let anomaly = e.detect_gap(very_late, 5, now).unwrap();
        assert_eq!(anomaly.severity, AnomalySeverity::Critical);
    }

    #[test]
    fn test_null_ratio_bands() {
        // At exactly the warning threshold: warning.
        assert_eq!(
            AnomalyEngine::classify_null_ratio(0.05, 0.05, 0.20),
            AnomalySeverity::Warning
        );
        // Strictly below: info.
        assert_eq!(
            AnomalyEngine::classify_null_ratio(0.049, 0.05, 0.20),
            AnomalySeverity::Info
        );
        // At/above the error threshold: error.
        assert_eq!(
            AnomalyEngine::classify_null_ratio(0.20, 0.05, 0.20),
            AnomalySeverity::Error
        );
    }

    #[test]
    fn test_template_config_blocks_gate_evaluation() {
        let e = engine();
        let now = Utc::now();
        let stale = now - Duration::minutes(10);

        let config = serde_json::json!({
            "gap_detection": {"enabled": true, "minutes": 5},
            "volume_spike": {"enabled": false, "multiplier": 3.0},
        });
        let anomalies = e.evaluate_template_config(1000, Some(10.0), Some(stale), &config, now);
        // Spike block disabled: only the gap fires despite the huge spike.
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, "gap_detection");
    }

    #[test]
    fn test_analyze_join_cardinality() {
        let e = engine();
        let original = RowSet {
            row_count: 100,
            ..Default::default()
        };
        let transformed = RowSet {
            row_count: 250,
            ..Default::default()
        };

        let verdict = e.analyze(
            &original,
            &transformed,
            TransformKind::Join,
            &AnalysisThresholds::default(),
        );
        assert_eq!(verdict.anomalies.len(), 1);
        assert_eq!(verdict.anomalies[0].kind, "cardinality");
        assert!(verdict.can_proceed);
    }

    #[test]
    fn test_analyze_null_errors_block() {
        let e = engine();
        let transformed = RowSet {
            row_count: 100,
            null_counts: [("email".to_string(), 30)].into_iter().collect(),
            ..Default::default()
        };

        let verdict = e.analyze(
            &RowSet::default(),
            &transformed,
            TransformKind::Filter,
            &AnalysisThresholds::default(),
        );
        assert_eq!(verdict.errors, 1);
        assert!(!verdict.can_proceed);
    }

    #[test]
    fn test_analyze_type_coercion_skipped_for_aggregation() {
        let e = engine();
        let original = RowSet {
            row_count: 10,
            columns: vec![("amount".to_string(), "bigint".to_string())],
            ..Default::default()
        };
        let transformed = RowSet {
            row_count: 10,
            columns: vec![("amount".to_string(), "double".to_string())],
            ..Default::default()
        };

        let coerced = e.analyze(
            &original,
            &transformed,
            TransformKind::Filter,
            &AnalysisThresholds::default(),
        );
        assert_eq!(coerced.anomalies[0].kind, "type_coercion");

        let aggregated = e.analyze(
            &original,
            &transformed,
            TransformKind::Aggregation,
            &AnalysisThresholds::default(),
        );
        assert!(aggregated.anomalies.is_empty());
    }

    #[test]
    fn test_analyze_filter_drop_is_informational() {
        let e = engine();
        let original = RowSet {
            row_count: 1000,
            ..Default::default()
        };
        let transformed = RowSet {
            row_count: 100,
            ..Default::default()
        };

        let verdict = e.analyze(
            &original,
            &transformed,
            TransformKind::Filter,
            &AnalysisThresholds::default(),
        );
        assert_eq!(verdict.anomalies[0].kind, "row_count_drop");
        assert_eq!(verdict.anomalies[0].severity, AnomalySeverity::Info);
        assert!(verdict.can_proceed);
    }
}
