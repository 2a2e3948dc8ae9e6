//! ClickHouse warehouse adapter
//!
//! Maps source types to ClickHouse types, renders and executes sink DDL over
//! the HTTP interface, and verifies live table schemas against expectations.
//! Every sink table carries three reserved CDC columns: a deletion marker,
//! a monotonic version, and the ingestion instant.

use crate::common::config::ClickHouseConfig;
use crate::errors::{DataflowError, Result};
use crate::models::ColumnInfo;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Reserved sink columns appended to every table.
pub const RESERVED_COLUMNS: [(&str, &str); 3] = [
    ("_deleted", "UInt8"),
    ("_version", "UInt64"),
    ("_inserted_at", "DateTime64(3)"),
];

/// Verification outcome for a live sink table.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    pub exists: bool,
    pub compatible: bool,
    pub missing_columns: Vec<String>,
    pub type_mismatches: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_table_sql: Option<String>,
}

/// Client for the ClickHouse HTTP interface.
pub struct ClickHouseClient {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
    pub database: String,
    type_map: BTreeMap<String, String>,
}

impl ClickHouseClient {
    pub fn new(config: &ClickHouseConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint(),
            username: config.username.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
            type_map: default_type_map(),
        })
    }

    /// Replace the built-in type map with a sink descriptor's map.
    pub fn with_type_map(mut self, type_map: BTreeMap<String, String>) -> Self {
        if !type_map.is_empty() {
            self.type_map = type_map;
        }
        self
    }

    /// Map a source type: exact match, then prefix match, then default.
    pub fn map_type(&self, source_type: &str) -> String {
        let source_lower = source_type.to_lowercase();
        if let Some(mapped) = self.type_map.get(&source_lower) {
            return mapped.clone();
        }
        for (key, value) in &self.type_map {
            if key != "default" && source_lower.starts_with(key.as_str()) {
                return value.clone();
            }
        }
        self.type_map
            .get("default")
            .cloned()
            .unwrap_or_else(|| "String".to_string())
    }

    /// Execute a statement; the response body is returned raw.
    #[instrument(skip(self, sql))]
    pub async fn execute(&self, sql: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", "text/plain")
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| DataflowError::SinkUnavailable(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(DataflowError::external(
                "clickhouse",
                format!("statement returned {status}: {body}"),
            ));
        }
        Ok(body)
    }

    /// Run a query with `FORMAT JSON` and return the `data` rows.
    pub async fn query_json(&self, sql: &str) -> Result<Vec<serde_json::Value>> {
        let body = self.execute(&format!("{sql} FORMAT JSON")).await?;
        let parsed: serde_json::Value = serde_json::from_str(&body)?;
        Ok(parsed
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// Connectivity probe; returns the server version.
    pub async fn test_connection(&self) -> Result<String> {
        let rows = self.query_json("SELECT version() AS version").await?;
        rows.first()
            .and_then(|r| r.get("version"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| DataflowError::SinkUnavailable("no version row returned".to_string()))
    }

    pub async fn create_database(&self, database: &str) -> Result<()> {
        self.execute(&format!("CREATE DATABASE IF NOT EXISTS {database}"))
            .await?;
        info!("Created database: {}", database);
        Ok(())
    }

    /// Render the CREATE TABLE statement for a source-schema projection.
    pub fn render_create_table(
        &self,
        table_name: &str,
        columns: &[ColumnInfo],
        order_by: Option<&[String]>,
    ) -> String {
        let mut column_defs: Vec<String> = columns
            .iter()
            .map(|col| {
                let mut ch_type = self.map_type(&col.data_type);
                if col.nullable {
                    ch_type = format!("Nullable({ch_type})");
                }
                format!("`{}` {}", col.name, ch_type)
            })
            .collect();

        column_defs.push("`_deleted` UInt8 DEFAULT 0".to_string());
        column_defs.push("`_version` UInt64 DEFAULT 0".to_string());
        column_defs.push("`_inserted_at` DateTime64(3) DEFAULT now64(3)".to_string());

        // ORDER BY from primary keys, else the first column.
        let order_cols: Vec<String> = match order_by {
            Some(cols) if !cols.is_empty() => cols.to_vec(),
            _ => {
                let pk_cols: Vec<String> = columns
                    .iter()
                    .filter(|c| c.is_primary_key)
                    .map(|c| c.name.clone())
                    .collect();
                if pk_cols.is_empty() {
                    columns.first().map(|c| vec![c.name.clone()]).unwrap_or_default()
                } else {
                    pk_cols
                }
            }
        };
        let order_by_sql = order_cols
            .iter()
            .map(|c| format!("`{c}`"))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "CREATE TABLE IF NOT EXISTS {}.{} (\n    {}\n)\nENGINE = ReplacingMergeTree(_version)\nORDER BY ({})",
            self.database,
            table_name,
            column_defs.join(",\n    "),
            order_by_sql
        )
    }

    /// Create a sink table for a source-schema projection.
    #[instrument(skip(self, columns))]
    pub async fn create_table(
        &self,
        table_name: &str,
        columns: &[ColumnInfo],
        order_by: Option<&[String]>,
    ) -> Result<String> {
        let sql = self.render_create_table(table_name, columns, order_by);
        self.execute(&sql).await?;
        info!("Created sink table: {}.{}", self.database, table_name);
        Ok(sql)
    }

    /// Compare a live table against the expected source schema.
    pub async fn verify(&self, table_name: &str, expected: &[ColumnInfo]) -> Result<VerifyResult> {
        let rows = self
            .query_json(&format!(
                "SELECT name, type FROM system.columns WHERE database = '{}' AND table = '{}'",
                self.database, table_name
            ))
            .await?;

        if rows.is_empty() {
            return Ok(VerifyResult {
                exists: false,
                compatible: false,
                missing_columns: expected.iter().map(|c| c.name.clone()).collect(),
                type_mismatches: vec![],
                create_table_sql: Some(self.render_create_table(table_name, expected, None)),
            });
        }

        let live: BTreeMap<String, String> = rows
            .iter()
            .filter_map(|r| {
                Some((
                    r.get("name")?.as_str()?.to_string(),
                    r.get("type")?.as_str()?.to_string(),
                ))
            })
            .collect();

        let mut missing_columns = Vec::new();
        let mut type_mismatches = Vec::new();

        for col in expected {
            let mut wanted = self.map_type(&col.data_type);
            if col.nullable {
                wanted = format!("Nullable({wanted})");
            }
            match live.get(&col.name) {
                None => missing_columns.push(col.name.clone()),
                Some(actual) if actual != &wanted => {
                    type_mismatches.push(format!(
                        "{}: expected {}, found {}",
                        col.name, wanted, actual
                    ));
                }
                Some(_) => {}
            }
        }

        for (name, _) in RESERVED_COLUMNS {
            if !live.contains_key(name) {
                missing_columns.push(name.to_string());
            }
        }

        let compatible = missing_columns.is_empty() && type_mismatches.is_empty();
        if !compatible {
            warn!(
                "Sink table {}.{} schema mismatch: {} missing, {} mismatched",
                self.database,
                table_name,
                missing_columns.len(),
                type_mismatches.len()
            );
        }

        Ok(VerifyResult {
            exists: true,
            compatible,
            missing_columns,
            type_mismatches,
            create_table_sql: None,
        })
    }

    /// Like [`verify`](Self::verify), but an incompatible or missing table
    /// is an error instead of a report.
    pub async fn verify_strict(&self, table_name: &str, expected: &[ColumnInfo]) -> Result<()> {
        let result = self.verify(table_name, expected).await?;
        if result.compatible {
            return Ok(());
        }
        let mut problems = result.missing_columns.clone();
        problems.extend(result.type_mismatches.clone());
        if !result.exists {
            problems.insert(0, "table does not exist".to_string());
        }
        Err(DataflowError::IncompatibleSchema {
            table: table_name.to_string(),
            problems,
        })
    }

    pub async fn drop_table(&self, database: &str, table_name: &str) -> Result<()> {
        self.execute(&format!("DROP TABLE IF EXISTS {database}.{table_name}"))
            .await?;
        info!("Dropped sink table: {}.{}", database, table_name);
        Ok(())
    }
}

fn default_type_map() -> BTreeMap<String, String> {
    [
        ("integer", "Int32"),
        ("int", "Int32"),
        ("int4", "Int32"),
        ("bigint", "Int64"),
        ("int8", "Int64"),
        ("smallint", "Int16"),
        ("int2", "Int16"),
        ("serial", "UInt32"),
        ("bigserial", "UInt64"),
        ("boolean", "UInt8"),
        ("bool", "UInt8"),
        ("varchar", "String"),
        ("character varying", "String"),
        ("text", "String"),
        ("char", "String"),
        ("character", "String"),
        ("decimal", "Decimal(18, 4)"),
        ("numeric", "Decimal(18, 4)"),
        ("real", "Float32"),
        ("float4", "Float32"),
        ("double precision", "Float64"),
        ("float8", "Float64"),
        ("date", "Date"),
        ("timestamp", "DateTime64(3)"),
        ("timestamptz", "DateTime64(3)"),
        ("time", "String"),
        ("json", "String"),
        ("jsonb", "String"),
        ("uuid", "UUID"),
        ("bytea", "String"),
        ("inet", "String"),
        ("default", "String"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClickHouseClient {
        ClickHouseClient::new(&ClickHouseConfig::default()).unwrap()
    }

    fn col(name: &str, data_type: &str, nullable: bool, pk: bool) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable,
            ordinal: 0,
            is_primary_key: pk,
        }
    }

    #[test]
    fn test_type_mapping() {
        let ch = client();
        assert_eq!(ch.map_type("integer"), "Int32");
        assert_eq!(ch.map_type("BIGINT"), "Int64");
        // Prefix fallback
        assert_eq!(ch.map_type("timestamp without time zone"), "DateTime64(3)");
        assert_eq!(ch.map_type("geometry"), "String");
    }

    #[test]
    fn test_render_create_table_reserved_columns() {
        let ch = client();
        let columns = vec![
            col("id", "bigint", false, true),
            col("status", "character varying", true, false),
        ];
        let sql = ch.render_create_table("orders", &columns, None);

        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS dataflow.orders"));
        assert!(sql.contains("`id` Int64"));
        assert!(sql.contains("`status` Nullable(String)"));
        assert!(sql.contains("`_deleted` UInt8 DEFAULT 0"));
        assert!(sql.contains("`_version` UInt64 DEFAULT 0"));
        assert!(sql.contains("`_inserted_at` DateTime64(3) DEFAULT now64(3)"));
        assert!(sql.contains("ENGINE = ReplacingMergeTree(_version)"));
        assert!(sql.contains("ORDER BY (`id`)"));
    }

    #[test]
    fn test_order_by_falls_back_to_first_column() {
        let ch = client();
        let columns = vec![
            col("a", "text", true, false),
            col("b", "text", true, false),
        ];
        let sql = ch.render_create_table("t", &columns, None);
        assert!(sql.contains("ORDER BY (`a`)"));
    }

    #[test]
    fn test_custom_type_map_override() {
        let ch = client().with_type_map(
            [("integer".to_string(), "Int128".to_string()), ("default".to_string(), "String".to_string())]
                .into_iter()
                .collect(),
        );
        assert_eq!(ch.map_type("integer"), "Int128");
        assert_eq!(ch.map_type("varchar"), "String");
    }
}
