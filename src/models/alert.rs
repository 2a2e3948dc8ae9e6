//! Alert rules, anomalies, and delivery history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monitoring rule kinds evaluated by the anomaly engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    VolumeSpike,
    VolumeDrop,
    GapDetection,
    NullRatio,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VolumeSpike => "volume_spike",
            Self::VolumeDrop => "volume_drop",
            Self::GapDetection => "gap_detection",
            Self::NullRatio => "null_ratio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "volume_spike" => Some(Self::VolumeSpike),
            "volume_drop" => Some(Self::VolumeDrop),
            "gap_detection" => Some(Self::GapDetection),
            "null_ratio" => Some(Self::NullRatio),
            _ => None,
        }
    }
}

/// Severity attached to rules and produced anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AnomalySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for AnomalySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitoring rule scoped either to a pipeline or to the whole user
/// (`pipeline_id = None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub user_id: String,
    pub pipeline_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub rule_kind: RuleKind,
    /// Kind-specific thresholds, e.g. `{"multiplier": 3.0}` or `{"minutes": 5}`.
    pub threshold_config: serde_json::Value,
    /// Enabled weekdays, 0 = Monday .. 6 = Sunday.
    pub enabled_days: Vec<u8>,
    /// Optional enabled hours (UTC). None means unrestricted.
    pub enabled_hours: Option<Vec<u8>>,
    pub cooldown_minutes: i64,
    pub severity: AnomalySeverity,
    pub recipients: Vec<String>,
    pub is_active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub trigger_count: i64,
    pub created_at: DateTime<Utc>,
}

impl AlertRule {
    /// Threshold as f64 with a default, read from the kind-specific blob.
    pub fn threshold_f64(&self, key: &str, default: f64) -> f64 {
        self.threshold_config
            .get(key)
            .and_then(|v| v.as_f64())
            .unwrap_or(default)
    }

    pub fn threshold_i64(&self, key: &str, default: i64) -> i64 {
        self.threshold_config
            .get(key)
            .and_then(|v| v.as_i64())
            .unwrap_or(default)
    }
}

/// An anomaly produced by rule evaluation, ready for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    /// Matches the producing rule kind, plus engine-only kinds
    /// (`cardinality`, `row_count_drop`, `type_coercion`).
    pub kind: String,
    pub severity: AnomalySeverity,
    pub column: Option<String>,
    pub message: String,
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_name: Option<String>,
}

/// Record of one alert dispatch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertHistory {
    pub id: String,
    pub rule_id: String,
    pub alert_kind: String,
    pub severity: AnomalySeverity,
    pub title: String,
    pub body: String,
    pub details: Option<serde_json::Value>,
    pub email_sent: bool,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub email_recipients: Vec<String>,
    pub email_error: Option<String>,
    pub triggered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_accessor_defaults() {
        let rule = AlertRule {
            id: "r1".to_string(),
            user_id: "u1".to_string(),
            pipeline_id: None,
            name: "spike".to_string(),
            description: None,
            rule_kind: RuleKind::VolumeSpike,
            threshold_config: serde_json::json!({"multiplier": 4.0}),
            enabled_days: vec![4],
            enabled_hours: None,
            cooldown_minutes: 30,
            severity: AnomalySeverity::Warning,
            recipients: vec![],
            is_active: true,
            last_triggered_at: None,
            trigger_count: 0,
            created_at: Utc::now(),
        };
        assert_eq!(rule.threshold_f64("multiplier", 3.0), 4.0);
        assert_eq!(rule.threshold_f64("threshold", 0.2), 0.2);
        assert_eq!(rule.threshold_i64("minutes", 5), 5);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AnomalySeverity::Critical > AnomalySeverity::Warning);
        assert!(AnomalySeverity::Warning > AnomalySeverity::Info);
    }
}
