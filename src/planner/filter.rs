//! Natural-language filter planning
//!
//! Converts phrases like "only login and logout events" into structured
//! predicates: `event_type IN ('login', 'logout')`. Works from the target
//! table's columns, optionally validated against sampled distinct values.

use crate::errors::{DataflowError, Result};
use crate::models::ColumnInfo;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Structured predicate produced by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub column: String,
    /// `=`, `!=`, `IN`, `NOT IN`, `= true`, `= false`
    pub operator: String,
    pub values: Vec<String>,
    pub sql_where: String,
    /// The original natural-language requirement.
    pub description: String,
    /// 0.0 to 1.0 - how confident the planner is in the match.
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterKind {
    Categorical,
    Temporal,
    Boolean,
}

/// Analysis of a column for filtering purposes.
#[derive(Debug, Clone)]
struct ColumnAnalysis {
    name: String,
    is_categorical: bool,
    is_temporal: bool,
    is_boolean: bool,
    relevance_score: i32,
}

/// Generates SQL predicates from natural-language filter requirements.
pub struct FilterPlanner {
    inclusion: Vec<Regex>,
    exclusion: Vec<Regex>,
    temporal: Vec<Regex>,
    boolean: Vec<Regex>,
    categorical_columns: Vec<Regex>,
    temporal_columns: Vec<Regex>,
    boolean_columns: Vec<Regex>,
    value_suffix: Regex,
    split_and: Regex,
    split_comma: Regex,
}

impl Default for FilterPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterPlanner {
    pub fn new() -> Self {
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(&format!("(?i){p}")).expect("static pattern"))
                .collect::<Vec<_>>()
        };

        Self {
            inclusion: compile(&[
                r"only\s+(.+?)(?:\s+events?|\s+records?|\s+rows?|\s+data)?$",
                r"just\s+(.+?)(?:\s+events?|\s+records?|\s+rows?|\s+data)?$",
                r"specific(?:ally)?\s+(.+?)(?:\s+events?|\s+records?|\s+rows?)?$",
                r"where\s+(.+)",
                r"filter(?:ed)?\s+(?:to|by|for)\s+(.+)",
                r"sync\s+only\s+(.+)",
            ]),
            exclusion: compile(&[
                r"exclude\s+(.+?)(?:\s+events?|\s+records?|\s+rows?)?$",
                r"not\s+(.+?)(?:\s+events?|\s+records?|\s+rows?)?$",
                r"without\s+(.+?)(?:\s+events?|\s+records?|\s+rows?)?$",
                r"except\s+(.+?)(?:\s+events?|\s+records?|\s+rows?)?$",
                r"ignore\s+(.+?)(?:\s+events?|\s+records?|\s+rows?)?$",
            ]),
            temporal: compile(&[
                r"(?:from|in|within)\s+(?:the\s+)?last\s+(\d+)\s+(day|week|month|hour|minute)s?",
                r"(?:from|since|after)\s+(\d{4}-\d{2}-\d{2})",
                r"(?:before|until)\s+(\d{4}-\d{2}-\d{2})",
                r"today(?:'s)?",
                r"yesterday",
                r"this\s+(week|month|year)",
            ]),
            boolean: compile(&[
                r"active\s+(?:only|records?)",
                r"deleted\s+records?",
                r"non[- ]?deleted",
                r"enabled",
                r"disabled",
                r"verified",
                r"unverified",
            ]),
            categorical_columns: compile(&[
                "type", "status", "category", "event", "action", "state", "kind", "class", "role",
                "level", "tier",
            ]),
            temporal_columns: compile(&[
                "created", "updated", "timestamp", "date", "time", "at$", "_at$", "_on$",
            ]),
            boolean_columns: compile(&[
                "is_", "has_", "deleted", "active", "enabled", "verified", "flag", "bool",
            ]),
            value_suffix: Regex::new(r"(?i)\s*(events?|records?|rows?|data|entries)\s*$")
                .expect("static pattern"),
            split_and: Regex::new(r"\s+and\s+").expect("static pattern"),
            split_comma: Regex::new(r",\s*").expect("static pattern"),
        }
    }

    /// Generate a predicate from a natural-language requirement.
    pub fn generate(
        &self,
        requirement: &str,
        columns: &[ColumnInfo],
        sample_values: Option<&HashMap<String, Vec<String>>>,
    ) -> Result<FilterConfig> {
        let (filter_kind, mut values, is_exclusion) = self.extract_values(requirement);

        debug!(
            "Filter requirement '{}' -> kind={:?} values={:?} exclusion={}",
            requirement, filter_kind, values, is_exclusion
        );

        let (column, mut confidence) = self
            .find_best_column(requirement, columns, filter_kind)
            .or_else(|| {
                // Fallback: first textual column at low confidence.
                columns
                    .iter()
                    .find(|c| {
                        let t = c.data_type.to_lowercase();
                        t.contains("varchar") || t.contains("text")
                    })
                    .map(|c| (c.name.clone(), 0.3))
            })
            .ok_or_else(|| DataflowError::NoSuitableColumn(requirement.to_string()))?;

        // Validate against sampled distinct values: keep the hits, boost
        // confidence per hit.
        if let Some(samples) = sample_values {
            if let Some(known) = samples.get(&column) {
                let known_lower: Vec<String> = known.iter().map(|v| v.to_lowercase()).collect();
                let validated: Vec<String> = values
                    .iter()
                    .filter(|v| known_lower.contains(&v.to_lowercase()))
                    .cloned()
                    .collect();
                if !validated.is_empty() {
                    confidence = (confidence + 0.1 * validated.len() as f64).min(1.0);
                    values = validated;
                }
            }
        }

        let (operator, values, sql_where, confidence) = match filter_kind {
            FilterKind::Boolean => {
                let negated = is_exclusion
                    || ["non", "not", "un", "deleted"]
                        .iter()
                        .any(|n| requirement.to_lowercase().contains(n));
                if negated {
                    (
                        "= false".to_string(),
                        vec!["false".to_string()],
                        format!("{column} = false OR {column} IS NULL"),
                        confidence,
                    )
                } else {
                    (
                        "= true".to_string(),
                        vec!["true".to_string()],
                        format!("{column} = true"),
                        confidence,
                    )
                }
            }
            _ if values.len() > 1 => {
                let quoted = values
                    .iter()
                    .map(|v| format!("'{v}'"))
                    .collect::<Vec<_>>()
                    .join(", ");
                if is_exclusion {
                    (
                        "NOT IN".to_string(),
                        values,
                        format!("{column} NOT IN ({quoted})"),
                        confidence,
                    )
                } else {
                    (
                        "IN".to_string(),
                        values,
                        format!("{column} IN ({quoted})"),
                        confidence,
                    )
                }
            }
            _ if values.len() == 1 => {
                let value = &values[0];
                if is_exclusion {
                    (
                        "!=".to_string(),
                        values.clone(),
                        format!("{column} != '{value}'"),
                        confidence,
                    )
                } else {
                    (
                        "=".to_string(),
                        values.clone(),
                        format!("{column} = '{value}'"),
                        confidence,
                    )
                }
            }
            _ => {
                // Nothing extracted: emit a template for the user to fill in.
                (
                    "IN".to_string(),
                    vec!["value1".to_string(), "value2".to_string()],
                    format!("{column} IN ('value1', 'value2')"),
                    0.2,
                )
            }
        };

        Ok(FilterConfig {
            column,
            operator,
            values,
            sql_where,
            description: requirement.to_string(),
            confidence,
        })
    }

    /// Generate and AND-combine multiple requirements; failed requirements
    /// are skipped.
    pub fn generate_multiple(
        &self,
        requirements: &[String],
        columns: &[ColumnInfo],
        sample_values: Option<&HashMap<String, Vec<String>>>,
    ) -> Vec<FilterConfig> {
        requirements
            .iter()
            .filter_map(|req| self.generate(req, columns, sample_values).ok())
            .collect()
    }

    /// Combine filters into a single WHERE clause.
    pub fn combine(&self, filters: &[FilterConfig], operator: &str) -> String {
        match filters {
            [] => String::new(),
            [single] => single.sql_where.clone(),
            many => many
                .iter()
                .map(|f| format!("({})", f.sql_where))
                .collect::<Vec<_>>()
                .join(&format!(" {operator} ")),
        }
    }

    fn extract_values(&self, requirement: &str) -> (FilterKind, Vec<String>, bool) {
        let mut text = requirement.to_lowercase().trim().to_string();

        let mut is_exclusion = false;
        for pattern in &self.exclusion {
            if let Some(caps) = pattern.captures(&text) {
                is_exclusion = true;
                if let Some(m) = caps.get(1) {
                    text = m.as_str().trim().to_string();
                }
                break;
            }
        }

        for pattern in &self.inclusion {
            if let Some(caps) = pattern.captures(&text) {
                if let Some(m) = caps.get(1) {
                    text = m.as_str().trim().to_string();
                }
                break;
            }
        }

        let raw_values: Vec<String> = if self.split_and.is_match(&text) {
            self.split_and.split(&text).map(str::to_string).collect()
        } else if text.contains(',') {
            self.split_comma
                .split(&text)
                .map(|p| p.replace(" and ", ""))
                .collect()
        } else {
            vec![text.clone()]
        };

        let values: Vec<String> = raw_values
            .iter()
            .map(|v| {
                let v = v.trim().trim_matches(|c| c == '"' || c == '\'');
                self.value_suffix.replace(v, "").trim().to_string()
            })
            .filter(|v| !v.is_empty())
            .collect();

        let kind = if self.temporal.iter().any(|p| p.is_match(requirement)) {
            FilterKind::Temporal
        } else if self.boolean.iter().any(|p| p.is_match(requirement)) {
            FilterKind::Boolean
        } else {
            FilterKind::Categorical
        };

        (kind, values, is_exclusion)
    }

    fn analyze_columns(&self, columns: &[ColumnInfo]) -> Vec<ColumnAnalysis> {
        let mut analyzed: Vec<ColumnAnalysis> = columns
            .iter()
            .map(|col| {
                let name_lower = col.name.to_lowercase();
                let type_lower = col.data_type.to_lowercase();

                let mut analysis = ColumnAnalysis {
                    name: col.name.clone(),
                    is_categorical: false,
                    is_temporal: false,
                    is_boolean: false,
                    relevance_score: 0,
                };

                if ["varchar", "text", "char", "string"]
                    .iter()
                    .any(|t| type_lower.contains(t))
                {
                    if self.categorical_columns.iter().any(|p| p.is_match(&name_lower)) {
                        analysis.is_categorical = true;
                        analysis.relevance_score += 10;
                    }
                } else if ["timestamp", "datetime", "date", "time"]
                    .iter()
                    .any(|t| type_lower.contains(t))
                {
                    analysis.is_temporal = true;
                    analysis.relevance_score += 5;
                } else if ["bool", "boolean", "bit"].iter().any(|t| type_lower.contains(t)) {
                    analysis.is_boolean = true;
                    analysis.relevance_score += 5;
                }

                if self.categorical_columns.iter().any(|p| p.is_match(&name_lower)) {
                    analysis.is_categorical = true;
                    analysis.relevance_score += 8;
                }
                if self.temporal_columns.iter().any(|p| p.is_match(&name_lower)) {
                    analysis.is_temporal = true;
                    analysis.relevance_score += 3;
                }
                if self.boolean_columns.iter().any(|p| p.is_match(&name_lower)) {
                    analysis.is_boolean = true;
                    analysis.relevance_score += 4;
                }

                analysis
            })
            .collect();

        analyzed.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
        analyzed
    }

    fn find_best_column(
        &self,
        requirement: &str,
        columns: &[ColumnInfo],
        filter_kind: FilterKind,
    ) -> Option<(String, f64)> {
        let analyzed = self.analyze_columns(columns);
        if analyzed.is_empty() {
            return None;
        }

        let req_lower = requirement.to_lowercase();

        // Exact column-name overlap wins.
        for col in &analyzed {
            let name_lower = col.name.to_lowercase();
            if req_lower.contains(&name_lower) || name_lower.contains(&req_lower) {
                return Some((col.name.clone(), 0.9));
            }
        }

        // Then match by type family.
        for col in &analyzed {
            let matched = match filter_kind {
                FilterKind::Categorical => col.is_categorical,
                FilterKind::Temporal => col.is_temporal,
                FilterKind::Boolean => col.is_boolean,
            };
            if matched {
                return Some((col.name.clone(), 0.7));
            }
        }

        // Generic fallback: best relevance score, capped low.
        let best = &analyzed[0];
        if best.relevance_score > 0 {
            let confidence = (best.relevance_score as f64 / 20.0).min(0.5);
            return Some((best.name.clone(), confidence));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, data_type: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            ordinal: 0,
            is_primary_key: false,
        }
    }

    fn audit_columns() -> Vec<ColumnInfo> {
        vec![
            column("id", "bigint"),
            column("event_type", "character varying"),
            column("created_at", "timestamp without time zone"),
            column("user_id", "bigint"),
        ]
    }

    #[test]
    fn test_inclusion_multi_value() {
        let planner = FilterPlanner::new();
        let config = planner
            .generate("only login and logout events", &audit_columns(), None)
            .unwrap();
        assert_eq!(config.column, "event_type");
        assert_eq!(config.operator, "IN");
        assert_eq!(config.values, vec!["login", "logout"]);
        assert_eq!(config.sql_where, "event_type IN ('login', 'logout')");
        assert!(config.confidence >= 0.7);
    }

    #[test]
    fn test_exclusion_single_value() {
        let planner = FilterPlanner::new();
        let config = planner
            .generate("exclude heartbeat events", &audit_columns(), None)
            .unwrap();
        assert_eq!(config.column, "event_type");
        assert_eq!(config.operator, "!=");
        assert_eq!(config.sql_where, "event_type != 'heartbeat'");
    }

    #[test]
    fn test_boolean_negated() {
        let planner = FilterPlanner::new();
        let columns = vec![column("id", "bigint"), column("deleted", "boolean")];
        let config = planner.generate("non-deleted records", &columns, None).unwrap();
        assert_eq!(config.column, "deleted");
        assert_eq!(config.sql_where, "deleted = false OR deleted IS NULL");
    }

    #[test]
    fn test_sample_values_boost_confidence() {
        let planner = FilterPlanner::new();
        let mut samples = HashMap::new();
        samples.insert(
            "event_type".to_string(),
            vec!["login".to_string(), "logout".to_string(), "purchase".to_string()],
        );
        let config = planner
            .generate("only login and logout events", &audit_columns(), Some(&samples))
            .unwrap();
        assert_eq!(config.values, vec!["login", "logout"]);
        assert!(config.confidence >= 0.9);
    }

    #[test]
    fn test_no_suitable_column() {
        let planner = FilterPlanner::new();
        let columns = vec![column("a", "bigint"), column("b", "double precision")];
        let err = planner.generate("only login events", &columns, None).unwrap_err();
        assert!(matches!(err, DataflowError::NoSuitableColumn(_)));
    }

    #[test]
    fn test_roundtrip_stability() {
        // Re-planning from the produced description yields the same structure.
        let planner = FilterPlanner::new();
        let first = planner
            .generate("only login and logout events", &audit_columns(), None)
            .unwrap();
        let second = planner.generate(&first.description, &audit_columns(), None).unwrap();
        assert_eq!(first.column, second.column);
        assert_eq!(first.operator, second.operator);
        assert_eq!(first.values, second.values);
    }

    #[test]
    fn test_combine_filters() {
        let planner = FilterPlanner::new();
        let a = planner
            .generate("only login events", &audit_columns(), None)
            .unwrap();
        let b = planner
            .generate("exclude bot events", &audit_columns(), None)
            .unwrap();
        let combined = planner.combine(&[a.clone(), b], "AND");
        assert!(combined.starts_with('('));
        assert!(combined.contains(" AND "));
        assert_eq!(planner.combine(&[a.clone()], "AND"), a.sql_where);
        assert_eq!(planner.combine(&[], "AND"), "");
    }
}
