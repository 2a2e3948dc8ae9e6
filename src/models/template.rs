//! Reusable transform templates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reusable ordered list of transformation configurations plus an
/// anomaly-detection configuration. A pipeline may reference one at
/// creation; the monitor picks up its anomaly thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformTemplate {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    /// Ordered transform configurations (filter, aggregation, ...).
    pub transforms: Vec<serde_json::Value>,
    /// Anomaly thresholds: `volume_spike`/`volume_drop`/`gap_detection` blocks
    /// with `enabled` plus kind-specific settings.
    pub anomaly_config: serde_json::Value,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
