//! Stream-table JOIN enrichments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    #[serde(rename = "LEFT")]
    Left,
    #[serde(rename = "INNER")]
    Inner,
}

impl JoinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "LEFT",
            Self::Inner => "INNER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LEFT" => Some(Self::Left),
            "INNER" => Some(Self::Inner),
            _ => None,
        }
    }
}

/// A lookup table joined against the source stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupTable {
    pub name: String,
    pub topic: String,
    /// Primary key column on the processor-side table.
    pub key_column: String,
    pub alias: String,
    /// Processor-side table name (derived from pipeline + topic).
    #[serde(default)]
    pub processor_table: Option<String>,
    pub schema: Vec<JoinColumn>,
}

/// Column name/type pair in processor SQL types (BIGINT, VARCHAR, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

/// One join-key mapping: stream column = table-alias column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinKey {
    pub stream_column: String,
    pub table_column: String,
    pub table_alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    Pending,
    Active,
    Failed,
    Stopped,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "failed" => Some(Self::Failed),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

/// A stream-table JOIN derived from a pipeline's source stream.
/// Cascades on pipeline delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrichment {
    pub id: String,
    pub pipeline_id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub source_stream_name: String,
    pub source_topic: String,
    pub lookup_tables: Vec<LookupTable>,
    pub join_type: JoinType,
    pub join_keys: Vec<JoinKey>,
    /// Qualified output expressions, `alias.column` form.
    pub output_columns: Vec<String>,
    pub output_stream_name: String,
    pub output_topic: String,
    pub processor_query_id: Option<String>,
    pub status: EnrichmentStatus,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_type_parse() {
        assert_eq!(JoinType::parse("left"), Some(JoinType::Left));
        assert_eq!(JoinType::parse("INNER"), Some(JoinType::Inner));
        assert_eq!(JoinType::parse("FULL OUTER"), None);
    }
}
