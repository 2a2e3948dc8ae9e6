//! Pipeline aggregate: configuration, state machine, and event journal

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline lifecycle states.
///
/// `pending → running ↔ paused`, `running|paused → stopped`, any → `failed`,
/// any → `deleted` (soft). `deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Pending,
    Running,
    Paused,
    Stopped,
    Failed,
    Deleted,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Whether `start` is allowed from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Pending | Self::Stopped)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The central aggregate: a named configuration that continuously moves
/// changes from source tables through optional transformations into a sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub source_credential_id: String,
    /// Fully qualified table names, e.g. `["public.orders"]`.
    pub source_tables: Vec<String>,
    pub source_connector_name: Option<String>,
    pub sink_kind: String,
    pub sink_config: serde_json::Value,
    pub sink_connector_name: Option<String>,
    /// Optional transform template applied at creation.
    pub template_id: Option<String>,
    /// Structured filter predicate (column/operator/values/sql_where blob).
    pub filter_config: Option<serde_json::Value>,
    pub status: PipelineStatus,
    pub last_health_check: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub metrics_cache: Option<serde_json::Value>,
    pub metrics_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Pipeline {
    /// Stable per-pipeline identifier: the id with separators removed.
    ///
    /// Used as topic prefix, slot name, publication name and connector-name
    /// suffix, so a recovering control plane can reattach to the same
    /// external resources.
    pub fn unique_id(&self) -> String {
        self.id.replace('-', "")
    }

    /// Topic prefix for all CDC topics of this pipeline.
    pub fn topic_prefix(&self) -> String {
        format!("dataflow_{}", self.unique_id())
    }

    /// CDC topic for a fully qualified table (`schema.table`).
    pub fn topic_for_table(&self, table: &str) -> String {
        format!("{}.{}", self.topic_prefix(), table)
    }
}

/// Request to create a pipeline. Everything the orchestrator needs to plan
/// provisioning; no external side effects happen at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source_credential_id: String,
    pub source_tables: Vec<String>,
    pub sink_kind: String,
    #[serde(default)]
    pub sink_config: serde_json::Value,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub filter_config: Option<serde_json::Value>,
}

/// Append-only audit record of pipeline state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub id: String,
    pub pipeline_id: String,
    pub kind: PipelineEventKind,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineEventKind {
    Created,
    Started,
    Paused,
    Resumed,
    Stopped,
    Failed,
    Error,
}

impl PipelineEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "started" => Some(Self::Started),
            "paused" => Some(Self::Paused),
            "resumed" => Some(Self::Resumed),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pipeline(id: &str) -> Pipeline {
        Pipeline {
            id: id.to_string(),
            user_id: "u1".to_string(),
            name: "orders sync".to_string(),
            description: None,
            source_credential_id: "c1".to_string(),
            source_tables: vec!["public.orders".to_string()],
            source_connector_name: None,
            sink_kind: "clickhouse".to_string(),
            sink_config: serde_json::json!({}),
            sink_connector_name: None,
            template_id: None,
            filter_config: None,
            status: PipelineStatus::Pending,
            last_health_check: None,
            error_message: None,
            metrics_cache: None,
            metrics_updated_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            stopped_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_unique_id_strips_hyphens() {
        let p = sample_pipeline("7f3c2a10-9b1e-4f6d-8a2b-0c1d2e3f4a5b");
        assert_eq!(p.unique_id(), "7f3c2a109b1e4f6d8a2b0c1d2e3f4a5b");
        assert_eq!(p.unique_id().len(), 32);
    }

    #[test]
    fn test_topic_naming_is_deterministic() {
        let p = sample_pipeline("7f3c2a10-9b1e-4f6d-8a2b-0c1d2e3f4a5b");
        assert_eq!(
            p.topic_for_table("public.orders"),
            "dataflow_7f3c2a109b1e4f6d8a2b0c1d2e3f4a5b.public.orders"
        );
        // Same input, same names: recovery can reattach.
        assert_eq!(p.topic_prefix(), p.topic_prefix());
    }

    #[test]
    fn test_start_precondition() {
        assert!(PipelineStatus::Pending.can_start());
        assert!(PipelineStatus::Stopped.can_start());
        assert!(!PipelineStatus::Running.can_start());
        assert!(!PipelineStatus::Deleted.can_start());
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for s in ["pending", "running", "paused", "stopped", "failed", "deleted"] {
            assert_eq!(PipelineStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(PipelineStatus::parse("archived").is_none());
    }
}
