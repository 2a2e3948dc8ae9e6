//! Discovered source-schema metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A column as reported by information_schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub ordinal: i32,
    #[serde(default)]
    pub is_primary_key: bool,
}

/// Foreign-key edge out of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub foreign_schema: String,
    pub foreign_table: String,
    pub foreign_column: String,
    pub constraint_name: String,
}

/// Cached result of schema introspection for one (credential, schema, table).
/// Upserted on re-discovery; unique on that triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredTable {
    pub id: String,
    pub credential_id: String,
    pub user_id: String,
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_keys: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub row_count_estimate: Option<i64>,
    pub table_size_bytes: Option<i64>,
    pub has_primary_key: bool,
    pub cdc_eligible: bool,
    pub cdc_issues: Vec<String>,
    pub replica_identity: String,
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredTable {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

/// FK relationship graph across the discovered tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub schema: String,
    pub has_primary_key: bool,
    pub cdc_eligible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    /// Column the relationship goes through.
    pub via: String,
    pub constraint: String,
}

impl RelationshipGraph {
    /// Build the graph from foreign keys of the given tables.
    pub fn from_tables(tables: &[DiscoveredTable]) -> Self {
        let mut graph = Self::default();
        for table in tables {
            graph.nodes.push(GraphNode {
                id: table.qualified_name(),
                label: table.table_name.clone(),
                schema: table.schema_name.clone(),
                has_primary_key: table.has_primary_key,
                cdc_eligible: table.cdc_eligible,
            });
            for fk in &table.foreign_keys {
                graph.edges.push(GraphEdge {
                    from: table.qualified_name(),
                    to: format!("{}.{}", fk.foreign_schema, fk.foreign_table),
                    via: fk.column.clone(),
                    constraint: fk.constraint_name.clone(),
                });
            }
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, fks: Vec<ForeignKey>) -> DiscoveredTable {
        DiscoveredTable {
            id: format!("t-{name}"),
            credential_id: "c1".to_string(),
            user_id: "u1".to_string(),
            schema_name: "public".to_string(),
            table_name: name.to_string(),
            columns: vec![],
            primary_keys: vec!["id".to_string()],
            foreign_keys: fks,
            row_count_estimate: Some(100),
            table_size_bytes: None,
            has_primary_key: true,
            cdc_eligible: true,
            cdc_issues: vec![],
            replica_identity: "DEFAULT".to_string(),
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn test_graph_edges_from_foreign_keys() {
        let orders = table(
            "orders",
            vec![ForeignKey {
                column: "user_id".to_string(),
                foreign_schema: "public".to_string(),
                foreign_table: "users".to_string(),
                foreign_column: "id".to_string(),
                constraint_name: "orders_user_id_fkey".to_string(),
            }],
        );
        let users = table("users", vec![]);

        let graph = RelationshipGraph::from_tables(&[orders, users]);
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].from, "public.orders");
        assert_eq!(graph.edges[0].to, "public.users");
        assert_eq!(graph.edges[0].via, "user_id");
    }
}
