//! Tracked external resources
//!
//! Every externally created artifact is recorded here so that deleting a
//! pipeline can reclaim everything it paid for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of resources that can be tracked.
///
/// The declaration order of the deletion table lives in
/// [`ResourceKind::DELETION_ORDER`], not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    KafkaTopic,
    KsqldbStream,
    KsqldbTable,
    SourceConnector,
    SinkConnector,
    ClickhouseTable,
    ClickhouseDatabase,
    AlertRule,
    DebeziumSlot,
    DebeziumPublication,
}

impl ResourceKind {
    /// Fixed kind order for teardown. Dependencies are deleted after their
    /// dependents: sinks first, raw topics and replication primitives last.
    pub const DELETION_ORDER: [ResourceKind; 10] = [
        ResourceKind::SinkConnector,
        ResourceKind::AlertRule,
        ResourceKind::KsqldbTable,
        ResourceKind::KsqldbStream,
        ResourceKind::SourceConnector,
        ResourceKind::KafkaTopic,
        ResourceKind::ClickhouseTable,
        ResourceKind::ClickhouseDatabase,
        ResourceKind::DebeziumSlot,
        ResourceKind::DebeziumPublication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KafkaTopic => "kafka_topic",
            Self::KsqldbStream => "ksqldb_stream",
            Self::KsqldbTable => "ksqldb_table",
            Self::SourceConnector => "source_connector",
            Self::SinkConnector => "sink_connector",
            Self::ClickhouseTable => "clickhouse_table",
            Self::ClickhouseDatabase => "clickhouse_database",
            Self::AlertRule => "alert_rule",
            Self::DebeziumSlot => "debezium_slot",
            Self::DebeziumPublication => "debezium_publication",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "kafka_topic" => Some(Self::KafkaTopic),
            "ksqldb_stream" => Some(Self::KsqldbStream),
            "ksqldb_table" => Some(Self::KsqldbTable),
            "source_connector" => Some(Self::SourceConnector),
            "sink_connector" => Some(Self::SinkConnector),
            "clickhouse_table" => Some(Self::ClickhouseTable),
            "clickhouse_database" => Some(Self::ClickhouseDatabase),
            "alert_rule" => Some(Self::AlertRule),
            "debezium_slot" => Some(Self::DebeziumSlot),
            "debezium_publication" => Some(Self::DebeziumPublication),
        _ => None,
        }
    }

    /// Position of the kind in the fixed teardown order.
    pub fn deletion_rank(&self) -> usize {
        Self::DELETION_ORDER
            .iter()
            .position(|k| k == self)
            .unwrap_or(Self::DELETION_ORDER.len())
    }
}

/// Status of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Planned but not yet created
    Pending,
    /// Currently being created
    Creating,
    /// Successfully created and running
    Active,
    /// Creation failed
    Failed,
    /// Currently being deleted
    Deleting,
    /// Successfully deleted
    Deleted,
    /// Lost reference, needs manual cleanup
    Orphaned,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Orphaned => "orphaned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "creating" => Some(Self::Creating),
            "active" => Some(Self::Active),
            "failed" => Some(Self::Failed),
            "deleting" => Some(Self::Deleting),
            "deleted" => Some(Self::Deleted),
            "orphaned" => Some(Self::Orphaned),
            _ => None,
        }
    }
}

/// A single tracked resource in a pipeline's ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedResource {
    pub kind: ResourceKind,
    /// Unique external identifier (topic name, connector name, ...).
    pub resource_id: String,
    pub resource_name: String,
    pub pipeline_id: String,
    pub status: ResourceStatus,
    pub metadata: serde_json::Value,
    pub created_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Resource ids this one depends on.
    pub depends_on: Vec<String>,
}

impl TrackedResource {
    pub fn new(
        pipeline_id: impl Into<String>,
        kind: ResourceKind,
        resource_id: impl Into<String>,
        resource_name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            resource_id: resource_id.into(),
            resource_name: resource_name.into(),
            pipeline_id: pipeline_id.into(),
            status: ResourceStatus::Pending,
            metadata: serde_json::Value::Null,
            created_at: None,
            deleted_at: None,
            error_message: None,
            depends_on: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deletion_rank_follows_fixed_table() {
        assert!(
            ResourceKind::SinkConnector.deletion_rank()
                < ResourceKind::SourceConnector.deletion_rank()
        );
        assert!(
            ResourceKind::SourceConnector.deletion_rank()
                < ResourceKind::KafkaTopic.deletion_rank()
        );
        assert!(
            ResourceKind::KafkaTopic.deletion_rank()
                < ResourceKind::DebeziumSlot.deletion_rank()
        );
        assert_eq!(ResourceKind::DebeziumPublication.deletion_rank(), 9);
    }

    #[test]
    fn test_kind_parse_roundtrip() {
        for kind in ResourceKind::DELETION_ORDER {
            assert_eq!(ResourceKind::parse(kind.as_str()), Some(kind));
        }
    }
}
