//! Stream-table JOIN planning
//!
//! Validates join requests against the declared stream and table schemas and
//! generates the processor DDL: a CREATE STREAM for the source, one CREATE
//! TABLE per lookup, and the CREATE STREAM ... AS SELECT join query.

use crate::errors::{DataflowError, Result};
use crate::models::{JoinKey, JoinType, LookupTable};
use crate::models::enrichment::JoinColumn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Join planning request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Name for the source stream, e.g. `login_events`.
    pub source_stream: String,
    pub source_topic: String,
    pub source_schema: Vec<JoinColumn>,
    pub lookup_tables: Vec<LookupTable>,
    pub join_keys: Vec<JoinKey>,
    /// Qualified output expressions: `s.event_time`, `u.email AS user_email`.
    pub output_columns: Vec<String>,
    pub join_type: JoinType,
    #[serde(default)]
    pub stream_key_column: Option<String>,
    #[serde(default = "default_value_format")]
    pub value_format: String,
    #[serde(default = "default_partitions")]
    pub partitions: i32,
}

fn default_value_format() -> String {
    "JSON".to_string()
}

fn default_partitions() -> i32 {
    3
}

/// Validation outcome carried inside a plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Generated plan: DDL plus the inferred output schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinPlan {
    pub stream_ddl: String,
    pub table_ddls: Vec<String>,
    pub join_ddl: String,
    pub output_stream: String,
    pub output_topic: String,
    pub output_schema: Vec<JoinColumn>,
    pub validation: JoinValidation,
}

/// Service for planning and validating stream-table JOINs.
pub struct JoinPlanner {
    as_split: Regex,
}

impl Default for JoinPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinPlanner {
    pub fn new() -> Self {
        Self {
            as_split: Regex::new(r"(?i)\s+AS\s+").expect("static pattern"),
        }
    }

    /// Plan a stream-table JOIN. Fails with `JoinValidationFailed` carrying
    /// every error when the request does not validate; warnings alone do not
    /// fail the plan.
    pub fn plan(&self, request: &JoinRequest) -> Result<JoinPlan> {
        let validation = self.validate(request);

        if !validation.valid {
            return Err(DataflowError::JoinValidationFailed {
                errors: validation.errors,
                warnings: validation.warnings,
            });
        }

        let output_stream = format!("enriched_{}", request.source_stream);
        let output_topic = output_stream.clone();

        let stream_ddl = self.stream_ddl(request);
        let table_ddls: Vec<String> = request
            .lookup_tables
            .iter()
            .map(|t| self.table_ddl(t, &request.value_format))
            .collect();
        let join_ddl = self.join_ddl(request, &output_stream, &output_topic);
        let output_schema = self.infer_output_schema(request);

        Ok(JoinPlan {
            stream_ddl,
            table_ddls,
            join_ddl,
            output_stream,
            output_topic,
            output_schema,
            validation,
        })
    }

    /// Validate a request without generating DDL.
    pub fn validate(&self, request: &JoinRequest) -> JoinValidation {
        let mut validation = JoinValidation {
            valid: true,
            errors: vec![],
            warnings: vec![],
        };

        if request.source_schema.is_empty() {
            validation.errors.push("Source schema is required".to_string());
        }
        if request.lookup_tables.is_empty() {
            validation
                .errors
                .push("At least one lookup table is required".to_string());
        }
        if request.join_keys.is_empty() {
            validation.errors.push("Join keys are required".to_string());
        }

        let stream_columns: HashMap<&str, &JoinColumn> = request
            .source_schema
            .iter()
            .map(|c| (c.name.as_str(), c))
            .collect();
        let tables: HashMap<&str, &LookupTable> = request
            .lookup_tables
            .iter()
            .map(|t| (t.alias.as_str(), t))
            .collect();

        for jk in &request.join_keys {
            let stream_col = stream_columns.get(jk.stream_column.as_str());
            if stream_col.is_none() {
                validation.errors.push(format!(
                    "Join key '{}' not found in stream schema",
                    jk.stream_column
                ));
            }

            let Some(table) = tables.get(jk.table_alias.as_str()) else {
                validation.errors.push(format!(
                    "Table alias '{}' not found in lookup tables",
                    jk.table_alias
                ));
                continue;
            };

            let table_col = table.schema.iter().find(|c| c.name == jk.table_column);
            if table_col.is_none() {
                validation.errors.push(format!(
                    "Join key '{}' not found in table '{}' schema",
                    jk.table_column, table.name
                ));
            }

            if let (Some(sc), Some(tc)) = (stream_col, table_col) {
                if !types_compatible(&sc.data_type, &tc.data_type) {
                    validation.errors.push(format!(
                        "Incompatible types: stream.{} ({}) vs {}.{} ({})",
                        jk.stream_column, sc.data_type, jk.table_alias, jk.table_column, tc.data_type
                    ));
                }

                if (sc.nullable || tc.nullable) && request.join_type == JoinType::Inner {
                    validation.warnings.push(format!(
                        "Join key '{}' is nullable; consider LEFT JOIN instead of INNER",
                        jk.stream_column
                    ));
                }
            }
        }

        // Output columns must be qualified with a known alias.
        let mut valid_aliases: Vec<&str> = vec!["s"];
        valid_aliases.extend(tables.keys().copied());
        for col in &request.output_columns {
            match col.split_once('.') {
                Some((alias, _)) => {
                    if !valid_aliases.contains(&alias) {
                        validation.errors.push(format!(
                            "Unknown alias '{}' in column '{}'. Valid aliases: {}",
                            alias,
                            col,
                            valid_aliases.join(", ")
                        ));
                    }
                }
                None => validation.warnings.push(format!(
                    "Column '{col}' should use an alias (e.g., 's.{col}')"
                )),
            }
        }

        if request.lookup_tables.len() > 3 {
            validation.warnings.push(format!(
                "Joining {} tables may cause performance issues",
                request.lookup_tables.len()
            ));
        }

        validation.valid = validation.errors.is_empty();
        validation
    }

    /// Recommend LEFT vs INNER based on join-key nullability.
    pub fn recommend_join_type(
        &self,
        stream_schema: &[JoinColumn],
        table_schema: &[JoinColumn],
        stream_key: &str,
        table_key: &str,
    ) -> JoinType {
        let stream_nullable = stream_schema
            .iter()
            .find(|c| c.name == stream_key)
            .map(|c| c.nullable)
            .unwrap_or(true);
        let table_nullable = table_schema
            .iter()
            .find(|c| c.name == table_key)
            .map(|c| c.nullable)
            .unwrap_or(true);

        if stream_nullable || table_nullable {
            JoinType::Left
        } else {
            JoinType::Inner
        }
    }

    fn stream_ddl(&self, request: &JoinRequest) -> String {
        let columns = request
            .source_schema
            .iter()
            .map(|c| format!("    {} {}", c.name, c.data_type.to_uppercase()))
            .collect::<Vec<_>>()
            .join(",\n");

        let mut with_clauses = vec![
            format!("KAFKA_TOPIC='{}'", request.source_topic),
            format!("VALUE_FORMAT='{}'", request.value_format),
        ];
        if request.stream_key_column.is_some() {
            with_clauses.push("KEY_FORMAT='JSON'".to_string());
            with_clauses.push(format!("PARTITIONS={}", request.partitions));
        }
        let with_str = with_clauses.join(",\n    ");

        format!(
            "CREATE STREAM {} (\n{}\n) WITH (\n    {}\n);",
            request.source_stream, columns, with_str
        )
    }

    fn table_ddl(&self, table: &LookupTable, value_format: &str) -> String {
        let columns = table
            .schema
            .iter()
            .map(|c| {
                if c.name == table.key_column {
                    format!("    {} {} PRIMARY KEY", c.name, c.data_type.to_uppercase())
                } else {
                    format!("    {} {}", c.name, c.data_type.to_uppercase())
                }
            })
            .collect::<Vec<_>>()
            .join(",\n");

        let name = table.processor_table.as_deref().unwrap_or(&table.name);

        format!(
            "CREATE TABLE {} (\n{}\n) WITH (\n    KAFKA_TOPIC='{}',\n    VALUE_FORMAT='{}',\n    KEY_FORMAT='KAFKA'\n);",
            name, columns, table.topic, value_format
        )
    }

    fn join_ddl(&self, request: &JoinRequest, output_stream: &str, output_topic: &str) -> String {
        let select_columns = request.output_columns.join(", ");

        let tables: HashMap<&str, &LookupTable> = request
            .lookup_tables
            .iter()
            .map(|t| (t.alias.as_str(), t))
            .collect();

        let join_clauses = request
            .join_keys
            .iter()
            .filter_map(|jk| {
                let table = tables.get(jk.table_alias.as_str())?;
                let name = table.processor_table.as_deref().unwrap_or(&table.name);
                Some(format!(
                    "    {} JOIN {} {}\n        ON s.{} = {}.{}",
                    request.join_type.as_str(),
                    name,
                    jk.table_alias,
                    jk.stream_column,
                    jk.table_alias,
                    jk.table_column
                ))
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "CREATE STREAM {}\nWITH (KAFKA_TOPIC='{}', VALUE_FORMAT='{}', PARTITIONS={}) AS\nSELECT\n    {}\nFROM {} s\n{}\nEMIT CHANGES;",
            output_stream,
            output_topic,
            request.value_format,
            request.partitions,
            select_columns,
            request.source_stream,
            join_clauses
        )
    }

    fn infer_output_schema(&self, request: &JoinRequest) -> Vec<JoinColumn> {
        let stream_columns: HashMap<&str, &JoinColumn> = request
            .source_schema
            .iter()
            .map(|c| (c.name.as_str(), c))
            .collect();
        let table_columns: HashMap<&str, HashMap<&str, &JoinColumn>> = request
            .lookup_tables
            .iter()
            .map(|t| {
                (
                    t.alias.as_str(),
                    t.schema.iter().map(|c| (c.name.as_str(), c)).collect(),
                )
            })
            .collect();

        request
            .output_columns
            .iter()
            .map(|expr| {
                let Some((alias, field)) = expr.split_once('.') else {
                    return JoinColumn {
                        name: expr.clone(),
                        data_type: "VARCHAR".to_string(),
                        nullable: true,
                    };
                };

                let parts: Vec<&str> = self.as_split.split(field).collect();
                let (field, output_name) = if parts.len() == 2 {
                    (parts[0].trim(), parts[1].trim())
                } else {
                    (field, field)
                };

                let data_type = if alias == "s" {
                    stream_columns.get(field).map(|c| c.data_type.clone())
                } else {
                    table_columns
                        .get(alias)
                        .and_then(|cols| cols.get(field))
                        .map(|c| c.data_type.clone())
                }
                .unwrap_or_else(|| "VARCHAR".to_string());

                JoinColumn {
                    name: output_name.to_string(),
                    data_type,
                    nullable: true,
                }
            })
            .collect()
    }
}

/// Processor-type compatibility for join keys: exact match, plus integer and
/// string equivalence classes.
fn types_compatible(a: &str, b: &str) -> bool {
    let a = a.trim().to_uppercase();
    let b = b.trim().to_uppercase();

    if a == b {
        return true;
    }

    const INT_TYPES: [&str; 5] = ["BIGINT", "INTEGER", "INT", "SMALLINT", "TINYINT"];
    const STRING_TYPES: [&str; 2] = ["VARCHAR", "STRING"];

    (INT_TYPES.contains(&a.as_str()) && INT_TYPES.contains(&b.as_str()))
        || (STRING_TYPES.contains(&a.as_str()) && STRING_TYPES.contains(&b.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str, nullable: bool) -> JoinColumn {
        JoinColumn {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable,
        }
    }

    fn users_table() -> LookupTable {
        LookupTable {
            name: "users".to_string(),
            topic: "dataflow_abc.public.users".to_string(),
            key_column: "id".to_string(),
            alias: "u".to_string(),
            processor_table: None,
            schema: vec![col("id", "BIGINT", false), col("email", "VARCHAR", true)],
        }
    }

    fn request() -> JoinRequest {
        JoinRequest {
            source_stream: "login_events".to_string(),
            source_topic: "dataflow_abc.public.login_events".to_string(),
            source_schema: vec![
                col("user_id", "BIGINT", false),
                col("event_time", "VARCHAR", true),
                col("ip_address", "VARCHAR", true),
            ],
            lookup_tables: vec![users_table()],
            join_keys: vec![JoinKey {
                stream_column: "user_id".to_string(),
                table_column: "id".to_string(),
                table_alias: "u".to_string(),
            }],
            output_columns: vec![
                "s.event_time".to_string(),
                "s.ip_address".to_string(),
                "u.email".to_string(),
            ],
            join_type: JoinType::Left,
            stream_key_column: None,
            value_format: "JSON".to_string(),
            partitions: 3,
        }
    }

    #[test]
    fn test_happy_path_plan() {
        let planner = JoinPlanner::new();
        let plan = planner.plan(&request()).unwrap();

        assert!(plan.stream_ddl.starts_with("CREATE STREAM login_events"));
        assert_eq!(plan.table_ddls.len(), 1);
        assert!(plan.table_ddls[0].contains("id BIGINT PRIMARY KEY"));
        assert!(plan.join_ddl.contains("LEFT JOIN users u"));
        assert!(plan.join_ddl.contains("ON s.user_id = u.id"));
        assert!(plan.join_ddl.ends_with("EMIT CHANGES;"));
        assert_eq!(plan.output_topic, "enriched_login_events");
        assert_eq!(plan.output_schema.len(), 3);
        assert_eq!(plan.output_schema[2].name, "email");
        assert_eq!(plan.output_schema[2].data_type, "VARCHAR");
    }

    #[test]
    fn test_unknown_alias_rejected() {
        let planner = JoinPlanner::new();
        let mut req = request();
        req.output_columns.push("x.email".to_string());

        let err = planner.plan(&req).unwrap_err();
        match err {
            DataflowError::JoinValidationFailed { errors, .. } => {
                assert!(errors.iter().any(|e| e.contains("Unknown alias 'x'")));
            }
            other => panic!("expected JoinValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_stream_column_rejected() {
        let planner = JoinPlanner::new();
        let mut req = request();
        req.join_keys[0].stream_column = "account_id".to_string();

        let err = planner.plan(&req).unwrap_err();
        match err {
            DataflowError::JoinValidationFailed { errors, .. } => {
                assert!(errors.iter().any(|e| e.contains("'account_id' not found in stream")));
            }
            other => panic!("expected JoinValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_incompatible_types_rejected() {
        let planner = JoinPlanner::new();
        let mut req = request();
        req.source_schema[0] = col("user_id", "VARCHAR", false);

        let err = planner.plan(&req).unwrap_err();
        match err {
            DataflowError::JoinValidationFailed { errors, .. } => {
                assert!(errors.iter().any(|e| e.contains("Incompatible types")));
            }
            other => panic!("expected JoinValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_int_family_compatible() {
        assert!(types_compatible("BIGINT", "INTEGER"));
        assert!(types_compatible("INT", "SMALLINT"));
        assert!(types_compatible("VARCHAR", "STRING"));
        assert!(!types_compatible("BIGINT", "VARCHAR"));
        assert!(types_compatible("BOOLEAN", "BOOLEAN"));
    }

    #[test]
    fn test_nullable_inner_join_warns() {
        let planner = JoinPlanner::new();
        let mut req = request();
        req.join_type = JoinType::Inner;
        req.source_schema[0] = col("user_id", "BIGINT", true);

        let plan = planner.plan(&req).unwrap();
        assert!(plan
            .validation
            .warnings
            .iter()
            .any(|w| w.contains("consider LEFT JOIN")));
    }

    #[test]
    fn test_many_tables_warns() {
        let planner = JoinPlanner::new();
        let mut req = request();
        for i in 0..4 {
            let mut t = users_table();
            t.alias = format!("t{i}");
            t.name = format!("lookup{i}");
            req.lookup_tables.push(t);
        }
        let plan = planner.plan(&req).unwrap();
        assert!(plan
            .validation
            .warnings
            .iter()
            .any(|w| w.contains("may cause performance issues")));
    }

    #[test]
    fn test_recommend_left_when_nullable() {
        let planner = JoinPlanner::new();
        let stream = vec![col("user_id", "BIGINT", true)];
        let table = vec![col("id", "BIGINT", false)];
        assert_eq!(
            planner.recommend_join_type(&stream, &table, "user_id", "id"),
            JoinType::Left
        );

        let stream = vec![col("user_id", "BIGINT", false)];
        assert_eq!(
            planner.recommend_join_type(&stream, &table, "user_id", "id"),
            JoinType::Inner
        );
    }

    #[test]
    fn test_output_schema_as_alias() {
        let planner = JoinPlanner::new();
        let mut req = request();
        req.output_columns = vec!["u.email AS user_email".to_string()];
        let plan = planner.plan(&req).unwrap();
        assert_eq!(plan.output_schema[0].name, "user_email");
        assert_eq!(plan.output_schema[0].data_type, "VARCHAR");
    }
}
