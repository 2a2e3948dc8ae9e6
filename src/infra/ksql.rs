//! Stream-processor client (ksqlDB wire protocol)
//!
//! DDL and query execution over the single-statement `/ksql` endpoint plus
//! `/query` pull queries for previews. Emits the transformation DDL used by
//! the orchestrator: filtered derived streams and windowed aggregations.
//!
//! Identifier case: the processor upper-cases unquoted identifiers while the
//! Avro schema binds exact-case lowercase names, so every identifier emitted
//! into filter predicates is backtick-quoted lowercase. String literals pass
//! through untouched.

use crate::common::config::ProcessorConfig;
use crate::errors::{DataflowError, Result};
use crate::models::enrichment::JoinColumn;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Outcome of a DDL statement. `already exists` responses are successes with
/// `created = false` so retries stay idempotent.
#[derive(Debug, Clone, Serialize)]
pub struct DdlOutcome {
    pub name: String,
    pub topic: Option<String>,
    pub created: bool,
    pub already_exists: bool,
    pub query_id: Option<String>,
}

/// One aggregation expression in a windowed aggregation.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct Aggregation {
    /// COUNT, SUM, AVG, MIN, MAX
    pub function: String,
    /// Column name or `*`
    pub column: String,
    pub alias: String,
}

/// Rows plus column names from a pull-query preview.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreviewRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Client for a ksqlDB-compatible stream processor.
pub struct ProcessorClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    default_partitions: i32,
    default_replicas: i32,
}

impl ProcessorClient {
    pub fn new(config: &ProcessorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout),
            default_partitions: config.default_partitions,
            default_replicas: config.default_replicas,
        })
    }

    /// Execute one statement against `/ksql`.
    #[instrument(skip(self, statement, stream_properties))]
    pub async fn execute(
        &self,
        statement: &str,
        stream_properties: Option<serde_json::Value>,
    ) -> Result<Vec<serde_json::Value>> {
        let payload = serde_json::json!({
            "ksql": statement,
            "streamsProperties": stream_properties.unwrap_or_else(|| serde_json::json!({})),
        });

        let response = self
            .client
            .post(format!("{}/ksql", self.base_url))
            .timeout(self.timeout)
            .header("Accept", "application/vnd.ksql.v1+json")
            .header("Content-Type", "application/vnd.ksql.v1+json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DataflowError::external(
                "stream-processor",
                format!("statement returned {status}: {body}"),
            ));
        }

        let result: serde_json::Value = response.json().await?;
        let head: String = statement.chars().take(100).collect();
        info!("Executed: {}...", head);
        Ok(match result {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        })
    }

    /// Server health from `/info`.
    pub async fn info(&self) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}/info", self.base_url))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| DataflowError::ConnectFailed(e.to_string()))?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// CREATE STREAM over an existing topic. When `schema_id` is given the
    /// column list is omitted and the registered schema is referenced instead
    /// - redeclaring columns would register a duplicate schema when a
    /// pipeline is recreated.
    pub async fn create_stream(
        &self,
        name: &str,
        topic: &str,
        schema: &[JoinColumn],
        value_format: &str,
        schema_id: Option<i64>,
    ) -> Result<DdlOutcome> {
        let name_upper = name.to_uppercase();

        let ksql = match schema_id {
            Some(id) => format!(
                "CREATE STREAM {name_upper} WITH (KAFKA_TOPIC='{topic}', VALUE_FORMAT='{value_format}', VALUE_SCHEMA_ID={id}, PARTITIONS={}, REPLICAS={});",
                self.default_partitions, self.default_replicas
            ),
            None => {
                let columns = schema
                    .iter()
                    .map(|c| format!("{} {}", c.name.to_uppercase(), c.data_type.to_uppercase()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "CREATE STREAM {name_upper} ({columns}) WITH (KAFKA_TOPIC='{topic}', VALUE_FORMAT='{value_format}', PARTITIONS={}, REPLICAS={});",
                    self.default_partitions, self.default_replicas
                )
            }
        };

        self.run_ddl(&name_upper, Some(topic), &ksql, None).await
    }

    /// CREATE TABLE over a (compacted) topic with a declared primary key.
    pub async fn create_table(
        &self,
        name: &str,
        topic: &str,
        schema: &[JoinColumn],
        key_column: &str,
        value_format: &str,
    ) -> Result<DdlOutcome> {
        let name_upper = name.to_uppercase();
        let key_upper = key_column.to_uppercase();

        let columns = schema
            .iter()
            .map(|c| {
                let col = format!("{} {}", c.name.to_uppercase(), c.data_type.to_uppercase());
                if c.name.to_uppercase() == key_upper {
                    format!("{col} PRIMARY KEY")
                } else {
                    col
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        let ksql = format!(
            "CREATE TABLE {name_upper} ({columns}) WITH (KAFKA_TOPIC='{topic}', VALUE_FORMAT='{value_format}', PARTITIONS={}, REPLICAS={});",
            self.default_partitions, self.default_replicas
        );

        self.run_ddl(&name_upper, Some(topic), &ksql, None).await
    }

    /// Execute a raw CREATE statement produced by a planner.
    pub async fn execute_ddl(&self, name: &str, statement: &str) -> Result<DdlOutcome> {
        self.run_ddl(name, None, statement, None).await
    }

    /// Create a filtered derived stream:
    /// `CREATE STREAM out WITH (...) AS SELECT * FROM src WHERE <quoted>`.
    ///
    /// Reads from the earliest offset so historical rows are processed too.
    #[instrument(skip(self, where_clause))]
    pub async fn create_filtered_stream(
        &self,
        source_stream: &str,
        output_stream: &str,
        where_clause: &str,
        select_columns: Option<&[String]>,
        output_topic: Option<&str>,
    ) -> Result<DdlOutcome> {
        validate_predicate(where_clause)?;

        let columns_sql = match select_columns {
            Some(cols) if !cols.is_empty() => cols
                .iter()
                .map(|c| c.to_uppercase())
                .collect::<Vec<_>>()
                .join(", "),
            _ => "*".to_string(),
        };

        let normalized = quote_predicate_identifiers(where_clause);
        info!("Normalized WHERE clause: '{}' -> '{}'", where_clause, normalized);

        let topic = output_topic
            .map(str::to_string)
            .unwrap_or_else(|| output_stream.to_lowercase());

        let ksql = format!(
            "CREATE STREAM {} WITH (KAFKA_TOPIC='{}', PARTITIONS={}, REPLICAS={}) AS SELECT {} FROM {} WHERE {} EMIT CHANGES;",
            output_stream.to_uppercase(),
            topic,
            self.default_partitions,
            self.default_replicas,
            columns_sql,
            source_stream.to_uppercase(),
            normalized
        );

        let properties = serde_json::json!({
            "ksql.streams.auto.offset.reset": "earliest",
        });

        self.run_ddl(&output_stream.to_uppercase(), Some(&topic), &ksql, Some(properties))
            .await
    }

    /// Create a windowed aggregation table
    /// (`TUMBLING` / `HOPPING` / `SESSION`).
    #[instrument(skip(self, aggregations, where_clause))]
    pub async fn create_windowed_aggregation(
        &self,
        source_stream: &str,
        output_table: &str,
        group_by: &[String],
        aggregations: &[Aggregation],
        window_type: &str,
        window_size: &str,
        where_clause: Option<&str>,
        output_topic: Option<&str>,
    ) -> Result<DdlOutcome> {
        if let Some(clause) = where_clause {
            validate_predicate(clause)?;
        }

        let window_upper = window_type.to_uppercase();
        if !matches!(window_upper.as_str(), "TUMBLING" | "HOPPING" | "SESSION") {
            return Err(DataflowError::Validation(format!(
                "Unsupported window type: {window_type}"
            )));
        }

        let agg_exprs: Vec<String> = aggregations
            .iter()
            .map(|agg| {
                let func = agg.function.to_uppercase();
                if agg.column == "*" {
                    format!("{func}(*) AS {}", agg.alias.to_uppercase())
                } else {
                    format!("{func}({}) AS {}", agg.column.to_uppercase(), agg.alias.to_uppercase())
                }
            })
            .collect();

        let group_by_sql = group_by
            .iter()
            .map(|c| c.to_uppercase())
            .collect::<Vec<_>>()
            .join(", ");

        let mut select_parts = vec![group_by_sql.clone()];
        select_parts.extend(agg_exprs);
        select_parts.push("WINDOWSTART AS WINDOW_START".to_string());
        select_parts.push("WINDOWEND AS WINDOW_END".to_string());

        let mut query = format!(
            "SELECT {} FROM {} ",
            select_parts.join(", "),
            source_stream.to_uppercase()
        );
        if let Some(clause) = where_clause {
            query.push_str(&format!("WHERE {} ", quote_predicate_identifiers(clause)));
        }
        query.push_str(&format!(
            "WINDOW {window_upper} (SIZE {window_size}) GROUP BY {group_by_sql} EMIT CHANGES"
        ));

        let topic = output_topic
            .map(str::to_string)
            .unwrap_or_else(|| output_table.to_lowercase());

        let ksql = format!(
            "CREATE TABLE {} WITH (KAFKA_TOPIC='{}', PARTITIONS={}, REPLICAS={}) AS {};",
            output_table.to_uppercase(),
            topic,
            self.default_partitions,
            self.default_replicas,
            query
        );

        self.run_ddl(&output_table.to_uppercase(), Some(&topic), &ksql, None)
            .await
    }

    /// Preview a transformation with a pull query against `/query`.
    /// The response is newline-delimited JSON: a header then row objects.
    pub async fn preview(
        &self,
        source_stream: &str,
        where_clause: Option<&str>,
        select_columns: Option<&[String]>,
        limit: usize,
    ) -> Result<PreviewRows> {
        if let Some(clause) = where_clause {
            validate_predicate(clause)?;
        }

        let columns_sql = match select_columns {
            Some(cols) if !cols.is_empty() => cols
                .iter()
                .map(|c| c.to_uppercase())
                .collect::<Vec<_>>()
                .join(", "),
            _ => "*".to_string(),
        };

        let mut query = format!("SELECT {} FROM {}", columns_sql, source_stream.to_uppercase());
        if let Some(clause) = where_clause {
            query.push_str(&format!(" WHERE {}", quote_predicate_identifiers(clause)));
        }
        query.push_str(&format!(" LIMIT {limit};"));

        let payload = serde_json::json!({
            "ksql": query,
            "streamsProperties": {"ksql.streams.auto.offset.reset": "earliest"},
        });

        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .timeout(self.timeout)
            .header("Accept", "application/vnd.ksql.v1+json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DataflowError::external(
                "stream-processor",
                format!("query returned {status}: {body}"),
            ));
        }

        let text = response.text().await?;
        let mut preview = PreviewRows::default();
        for line in text.lines() {
            let line = line.trim().trim_matches(',');
            if line.is_empty() || line == "[" || line == "]" {
                continue;
            }
            let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
                continue;
            };
            if let Some(header) = value.get("header") {
                if let Some(schema) = header.get("schema").and_then(|s| s.as_str()) {
                    preview.columns = parse_header_columns(schema);
                }
            } else if let Some(row) = value.get("row") {
                if let Some(columns) = row.get("columns").and_then(|c| c.as_array()) {
                    preview.rows.push(columns.clone());
                }
            }
        }

        Ok(preview)
    }

    pub async fn terminate_query(&self, query_id: &str) -> Result<()> {
        self.execute(&format!("TERMINATE {query_id};"), None).await?;
        info!("Terminated query: {}", query_id);
        Ok(())
    }

    pub async fn drop_stream(&self, name: &str, delete_topic: bool) -> Result<()> {
        let delete_clause = if delete_topic { " DELETE TOPIC" } else { "" };
        self.execute(
            &format!("DROP STREAM IF EXISTS {}{};", name.to_uppercase(), delete_clause),
            None,
        )
        .await?;
        info!("Dropped stream: {}", name.to_uppercase());
        Ok(())
    }

    pub async fn drop_table(&self, name: &str, delete_topic: bool) -> Result<()> {
        let delete_clause = if delete_topic { " DELETE TOPIC" } else { "" };
        self.execute(
            &format!("DROP TABLE IF EXISTS {}{};", name.to_uppercase(), delete_clause),
            None,
        )
        .await?;
        info!("Dropped table: {}", name.to_uppercase());
        Ok(())
    }

    pub async fn list_streams(&self) -> Result<Vec<serde_json::Value>> {
        let result = self.execute("SHOW STREAMS;", None).await?;
        Ok(result
            .first()
            .and_then(|r| r.get("streams"))
            .and_then(|s| s.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub async fn list_queries(&self) -> Result<Vec<serde_json::Value>> {
        let result = self.execute("SHOW QUERIES;", None).await?;
        Ok(result
            .first()
            .and_then(|r| r.get("queries"))
            .and_then(|s| s.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub async fn describe(&self, name: &str) -> Result<serde_json::Value> {
        let result = self
            .execute(&format!("DESCRIBE {};", name.to_uppercase()), None)
            .await?;
        result
            .into_iter()
            .next()
            .ok_or_else(|| DataflowError::external("stream-processor", "empty DESCRIBE response"))
    }

    async fn run_ddl(
        &self,
        name: &str,
        topic: Option<&str>,
        ksql: &str,
        properties: Option<serde_json::Value>,
    ) -> Result<DdlOutcome> {
        match self.execute(ksql, properties).await {
            Ok(result) => {
                let query_id = result.first().and_then(|r| {
                    r.get("commandId")
                        .or_else(|| r.get("queryId"))
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                });
                Ok(DdlOutcome {
                    name: name.to_string(),
                    topic: topic.map(str::to_string),
                    created: true,
                    already_exists: false,
                    query_id,
                })
            }
            Err(e) => {
                if e.to_string().to_lowercase().contains("already exists") {
                    warn!("{} already exists", name);
                    Ok(DdlOutcome {
                        name: name.to_string(),
                        topic: topic.map(str::to_string),
                        created: false,
                        already_exists: true,
                        query_id: None,
                    })
                } else {
                    Err(e)
                }
            }
        }
    }
}

/// Keywords that stay unquoted in predicates.
const SQL_KEYWORDS: [&str; 11] = [
    "AND", "OR", "NOT", "IN", "IS", "NULL", "TRUE", "FALSE", "LIKE", "BETWEEN", "EXISTS",
];

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\b").expect("static pattern"))
}

fn literal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"'(?:[^'\\]|\\.)*'").expect("static pattern"))
}

/// Backtick-quote lowercase identifiers in a predicate, leaving SQL keywords
/// and string literals untouched.
pub fn quote_predicate_identifiers(where_clause: &str) -> String {
    let literal = literal_regex();
    let identifier = identifier_regex();

    let mut out = String::with_capacity(where_clause.len() + 8);
    let mut last = 0;

    for m in literal.find_iter(where_clause) {
        out.push_str(&quote_segment(&where_clause[last..m.start()], identifier));
        out.push_str(m.as_str());
        last = m.end();
    }
    out.push_str(&quote_segment(&where_clause[last..], identifier));
    out
}

fn quote_segment(segment: &str, identifier: &Regex) -> String {
    identifier
        .replace_all(segment, |caps: &regex::Captures<'_>| {
            let word = &caps[1];
            if SQL_KEYWORDS.contains(&word.to_uppercase().as_str()) {
                word.to_string()
            } else {
                format!("`{}`", word.to_lowercase())
            }
        })
        .into_owned()
}

/// Reject predicates that could escape the statement: terminators, comments,
/// and DDL/DML keywords have no business in a row filter.
pub fn validate_predicate(where_clause: &str) -> Result<()> {
    let lowered = where_clause.to_lowercase();
    if where_clause.contains(';') || where_clause.contains("--") || where_clause.contains("/*") {
        return Err(DataflowError::Validation(
            "predicate contains statement terminators or comments".to_string(),
        ));
    }
    for keyword in ["drop ", "delete ", "insert ", "update ", "create ", "terminate "] {
        if lowered.contains(keyword) {
            return Err(DataflowError::Validation(format!(
                "predicate contains forbidden keyword '{}'",
                keyword.trim()
            )));
        }
    }
    Ok(())
}

fn parse_header_columns(schema: &str) -> Vec<String> {
    // Header schema looks like "`COL_A` STRING, `COL_B` BIGINT".
    schema
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            part.split_whitespace()
                .next()
                .map(|name| name.trim_matches('`').to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_simple_predicate() {
        assert_eq!(
            quote_predicate_identifiers("event_type IN ('login', 'logout')"),
            "`event_type` IN ('login', 'logout')"
        );
    }

    #[test]
    fn test_quote_preserves_keywords_and_literals() {
        assert_eq!(
            quote_predicate_identifiers("deleted = false OR deleted IS NULL"),
            "`deleted` = false OR `deleted` IS NULL"
        );
    }

    #[test]
    fn test_quote_mixed_case_identifier_lowered() {
        assert_eq!(
            quote_predicate_identifiers("EventType = 'Login'"),
            "`eventtype` = 'Login'"
        );
    }

    #[test]
    fn test_literal_content_never_quoted() {
        let quoted = quote_predicate_identifiers("note = 'status and state'");
        assert_eq!(quoted, "`note` = 'status and state'");
    }

    #[test]
    fn test_validate_predicate_rejects_escapes() {
        assert!(validate_predicate("event_type = 'x'; DROP STREAM y").is_err());
        assert!(validate_predicate("a = 1 -- comment").is_err());
        assert!(validate_predicate("drop table users").is_err());
        assert!(validate_predicate("event_type IN ('login')").is_ok());
    }

    #[test]
    fn test_parse_header_columns() {
        let cols = parse_header_columns("`USER_ID` BIGINT, `EMAIL` STRING");
        assert_eq!(cols, vec!["USER_ID", "EMAIL"]);
    }
}
