//! Source-schema discovery
//!
//! Connects to a source PostgreSQL database and extracts table metadata:
//! columns, keys, row-count estimates, and CDC eligibility. Results are
//! upserted into the metadata store so repeated discovery refreshes the
//! cache instead of duplicating it.

use crate::database::Database;
use crate::errors::{DataflowError, Result};
use crate::models::{ColumnInfo, DiscoveredTable, ForeignKey, RelationshipGraph, SourceSecret};
use crate::vault::CredentialVault;
use chrono::Utc;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{ConnectOptions, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub mod readiness;

/// Replica-identity modes under which CDC emits usable change events.
const CDC_REPLICA_IDENTITIES: [&str; 3] = ["FULL", "INDEX", "DEFAULT"];

/// Result bundle of one discovery run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DiscoveryResult {
    pub credential_id: String,
    pub schema_name: String,
    pub tables: Vec<DiscoveredTable>,
    pub table_count: usize,
    pub relationship_graph: RelationshipGraph,
    pub discovered_at: chrono::DateTime<Utc>,
}

/// Filter preview: matching-row count plus sample rows. Query failures are
/// reported inline, never propagated.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FilterPreview {
    pub filtered_count: i64,
    pub sample_rows: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Discovers database schema from PostgreSQL sources.
pub struct SchemaDiscovery {
    database: Arc<Database>,
    vault: Arc<CredentialVault>,
}

impl SchemaDiscovery {
    pub fn new(database: Arc<Database>, vault: Arc<CredentialVault>) -> Self {
        Self { database, vault }
    }

    /// Discover schema for a (credential, schema, optional table filter).
    #[instrument(skip(self))]
    pub async fn discover(
        &self,
        user_id: &str,
        credential_id: &str,
        schema_filter: &str,
        include_row_counts: bool,
        table_filter: Option<&[String]>,
    ) -> Result<DiscoveryResult> {
        let secret = self.vault.open(user_id, credential_id).await?;
        let mut conn = connect_source(&secret).await?;

        let table_names = self.list_tables(&mut conn, schema_filter, table_filter).await?;

        let mut tables = Vec::with_capacity(table_names.len());
        for table_name in table_names {
            let columns = self.table_columns(&mut conn, schema_filter, &table_name).await?;
            let primary_keys = self.primary_keys(&mut conn, schema_filter, &table_name).await?;
            let foreign_keys = self.foreign_keys(&mut conn, schema_filter, &table_name).await?;

            let row_count_estimate = if include_row_counts {
                Some(self.estimate_row_count(&mut conn, schema_filter, &table_name).await?)
            } else {
                None
            };
            let table_size_bytes = self.table_size(&mut conn, schema_filter, &table_name).await.ok();
            let replica_identity = self.replica_identity(&mut conn, schema_filter, &table_name).await?;

            let has_primary_key = !primary_keys.is_empty();
            let cdc_eligible =
                has_primary_key && CDC_REPLICA_IDENTITIES.contains(&replica_identity.as_str());

            let mut cdc_issues = Vec::new();
            if !has_primary_key {
                cdc_issues.push("Missing primary key - required for CDC".to_string());
            }
            if !CDC_REPLICA_IDENTITIES.contains(&replica_identity.as_str()) {
                cdc_issues.push(format!(
                    "REPLICA IDENTITY is {replica_identity} - consider setting to FULL or INDEX"
                ));
            }

            let columns = mark_primary_keys(columns, &primary_keys);

            let table = DiscoveredTable {
                id: Uuid::new_v4().to_string(),
                credential_id: credential_id.to_string(),
                user_id: user_id.to_string(),
                schema_name: schema_filter.to_string(),
                table_name,
                columns,
                primary_keys,
                foreign_keys,
                row_count_estimate,
                table_size_bytes,
                has_primary_key,
                cdc_eligible,
                cdc_issues,
                replica_identity,
                discovered_at: Utc::now(),
            };

            self.database.upsert_discovered_table(&table).await?;
            tables.push(table);
        }

        let relationship_graph = RelationshipGraph::from_tables(&tables);

        info!(
            "Discovered {} tables in schema '{}'",
            tables.len(),
            schema_filter
        );

        Ok(DiscoveryResult {
            credential_id: credential_id.to_string(),
            schema_name: schema_filter.to_string(),
            table_count: tables.len(),
            relationship_graph,
            tables,
            discovered_at: Utc::now(),
        })
    }

    /// Previously discovered tables from the cache.
    pub async fn cached(&self, user_id: &str, credential_id: &str) -> Result<Vec<DiscoveredTable>> {
        self.database.list_discovered_tables(user_id, credential_id).await
    }

    /// Count matching rows and fetch a sample for a predicate. On query
    /// failure returns a zero count and the error text.
    #[instrument(skip(self, predicate))]
    pub async fn get_filter_preview(
        &self,
        user_id: &str,
        credential_id: &str,
        schema_name: &str,
        table_name: &str,
        predicate: &str,
        limit: i64,
    ) -> Result<FilterPreview> {
        let secret = self.vault.open(user_id, credential_id).await?;
        let mut conn = connect_source(&secret).await?;

        let count_sql = format!(
            r#"SELECT COUNT(*) FROM "{schema_name}"."{table_name}" WHERE {predicate}"#
        );
        let sample_sql = format!(
            r#"SELECT row_to_json(t) FROM (SELECT * FROM "{schema_name}"."{table_name}" WHERE {predicate} LIMIT {limit}) t"#
        );

        let preview = async {
            let count: i64 = sqlx::query_scalar(&count_sql).fetch_one(&mut conn).await?;
            let rows: Vec<serde_json::Value> =
                sqlx::query_scalar(&sample_sql).fetch_all(&mut conn).await?;
            Ok::<_, sqlx::Error>((count, rows))
        }
        .await;

        match preview {
            Ok((filtered_count, sample_rows)) => {
                info!("Filter matches {} rows", filtered_count);
                Ok(FilterPreview {
                    filtered_count,
                    sample_rows,
                    error: None,
                })
            }
            Err(e) => {
                warn!("Filter preview failed: {}", e);
                Ok(FilterPreview {
                    filtered_count: 0,
                    sample_rows: vec![],
                    error: Some(e.to_string()),
                })
            }
        }
    }

    async fn list_tables(
        &self,
        conn: &mut PgConnection,
        schema: &str,
        table_filter: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let rows: Vec<PgRow> = match table_filter {
            Some(names) if !names.is_empty() => {
                sqlx::query(
                    r#"
                    SELECT table_name
                    FROM information_schema.tables
                    WHERE table_schema = $1
                      AND table_type = 'BASE TABLE'
                      AND table_name = ANY($2)
                    ORDER BY table_name
                    "#,
                )
                .bind(schema)
                .bind(names)
                .fetch_all(conn)
                .await?
            }
            _ => {
                sqlx::query(
                    r#"
                    SELECT table_name
                    FROM information_schema.tables
                    WHERE table_schema = $1
                      AND table_type = 'BASE TABLE'
                    ORDER BY table_name
                    "#,
                )
                .bind(schema)
                .fetch_all(conn)
                .await?
            }
        };
        Ok(rows.iter().map(|r| r.get("table_name")).collect())
    }

    async fn table_columns(
        &self,
        conn: &mut PgConnection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT column_name, data_type, is_nullable, ordinal_position
            FROM information_schema.columns
            WHERE table_schema = $1
              AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(conn)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get("column_name"),
                data_type: row.get("data_type"),
                nullable: row.get::<String, _>("is_nullable") == "YES",
                ordinal: row.get("ordinal_position"),
                is_primary_key: false,
            })
            .collect())
    }

    async fn primary_keys(
        &self,
        conn: &mut PgConnection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT a.attname
            FROM pg_index i
            JOIN pg_attribute a ON a.attrelid = i.indrelid
                AND a.attnum = ANY(i.indkey)
            WHERE i.indrelid = (quote_ident($1) || '.' || quote_ident($2))::regclass
              AND i.indisprimary
            ORDER BY a.attnum
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(conn)
        .await?;
        Ok(rows.iter().map(|r| r.get("attname")).collect())
    }

    async fn foreign_keys(
        &self,
        conn: &mut PgConnection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ForeignKey>> {
        let rows = sqlx::query(
            r#"
            SELECT
                kcu.column_name,
                ccu.table_schema AS foreign_table_schema,
                ccu.table_name AS foreign_table_name,
                ccu.column_name AS foreign_column_name,
                tc.constraint_name
            FROM information_schema.table_constraints AS tc
            JOIN information_schema.key_column_usage AS kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage AS ccu
                ON ccu.constraint_name = tc.constraint_name
                AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND tc.table_schema = $1
              AND tc.table_name = $2
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(conn)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ForeignKey {
                column: row.get("column_name"),
                foreign_schema: row.get("foreign_table_schema"),
                foreign_table: row.get("foreign_table_name"),
                foreign_column: row.get("foreign_column_name"),
                constraint_name: row.get("constraint_name"),
            })
            .collect())
    }

    async fn estimate_row_count(
        &self,
        conn: &mut PgConnection,
        schema: &str,
        table: &str,
    ) -> Result<i64> {
        let estimate: Option<i64> = sqlx::query_scalar(
            "SELECT n_live_tup FROM pg_stat_user_tables WHERE schemaname = $1 AND relname = $2",
        )
        .bind(schema)
        .bind(table)
        .fetch_optional(conn)
        .await?;
        Ok(estimate.unwrap_or(0))
    }

    async fn table_size(
        &self,
        conn: &mut PgConnection,
        schema: &str,
        table: &str,
    ) -> Result<i64> {
        let size: i64 = sqlx::query_scalar(
            "SELECT pg_total_relation_size((quote_ident($1) || '.' || quote_ident($2))::regclass)",
        )
        .bind(schema)
        .bind(table)
        .fetch_one(conn)
        .await?;
        Ok(size)
    }

    async fn replica_identity(
        &self,
        conn: &mut PgConnection,
        schema: &str,
        table: &str,
    ) -> Result<String> {
        let ident: Option<String> = sqlx::query_scalar(
            r#"
            SELECT relreplident::text
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1
              AND c.relname = $2
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_optional(conn)
        .await?;

        Ok(match ident.as_deref() {
            Some("d") => "DEFAULT",
            Some("n") => "NOTHING",
            Some("f") => "FULL",
            Some("i") => "INDEX",
            _ => "UNKNOWN",
        }
        .to_string())
    }
}

fn mark_primary_keys(mut columns: Vec<ColumnInfo>, primary_keys: &[String]) -> Vec<ColumnInfo> {
    for col in &mut columns {
        if primary_keys.iter().any(|pk| pk == &col.name) {
            col.is_primary_key = true;
        }
    }
    columns
}

/// Open a single connection to a source database with a 10 s budget.
pub(crate) async fn connect_source(secret: &SourceSecret) -> Result<PgConnection> {
    let options = PgConnectOptions::new()
        .host(&secret.host)
        .port(secret.port)
        .database(&secret.database)
        .username(&secret.username)
        .password(&secret.password);

    tokio::time::timeout(Duration::from_secs(10), options.connect())
        .await
        .map_err(|_| DataflowError::ConnectFailed("source connection timed out".to_string()))?
        .map_err(|e| DataflowError::ConnectFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_primary_keys() {
        let columns = vec![
            ColumnInfo {
                name: "id".to_string(),
                data_type: "bigint".to_string(),
                nullable: false,
                ordinal: 1,
                is_primary_key: false,
            },
            ColumnInfo {
                name: "email".to_string(),
                data_type: "character varying".to_string(),
                nullable: true,
                ordinal: 2,
                is_primary_key: false,
            },
        ];
        let marked = mark_primary_keys(columns, &["id".to_string()]);
        assert!(marked[0].is_primary_key);
        assert!(!marked[1].is_primary_key);
    }
}
