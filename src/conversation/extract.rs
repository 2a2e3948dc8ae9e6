//! Requirement extraction
//!
//! Pulls structured hints out of a user utterance before the stepwise flow
//! starts: source database, table, filter, destination, alert, aggregation.

use regex::Regex;
use serde::Serialize;

/// Hints extracted from one utterance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractedRequirements {
    pub source_hint: Option<String>,
    pub table_hint: Option<String>,
    pub filter_requirement: Option<String>,
    pub destination_hint: Option<String>,
    pub alert_requirement: Option<String>,
    pub aggregation_requirement: Option<String>,
    pub raw_message: String,
}

const FILTER_KEYWORDS: [&str; 10] = [
    "only", "just", "filter", "where", "specific", "exclude", "include", "certain", "particular",
    "limited to",
];

const ALERT_KEYWORDS: [&str; 11] = [
    "alert", "notify", "monitor", "watch", "gap", "missing", "no events", "no data", "spike",
    "drop", "anomaly",
];

const AGGREGATION_KEYWORDS: [&str; 10] = [
    "count", "sum", "average", "avg", "per hour", "per day", "per minute", "aggregate",
    "group by", "total",
];

const DESTINATION_KINDS: [&str; 9] = [
    "clickhouse", "bigquery", "s3", "snowflake", "elasticsearch", "kafka", "redshift",
    "postgresql", "mysql",
];

/// Extracts structured requirements from natural-language messages.
pub struct RequirementExtractor {
    source_patterns: Vec<Regex>,
    table_patterns: Vec<Regex>,
    filter_patterns: Vec<Regex>,
    alert_patterns: Vec<Regex>,
    aggregation_patterns: Vec<Regex>,
}

impl Default for RequirementExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl RequirementExtractor {
    pub fn new() -> Self {
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(&format!("(?i){p}")).expect("static pattern"))
                .collect::<Vec<_>>()
        };

        Self {
            source_patterns: compile(&[
                r"with\s+([a-zA-Z0-9_]+(?:_db|_database)?)\s+database",
                r"from\s+([a-zA-Z0-9_]+(?:_db|_database)?)\s+database",
                r"([a-zA-Z0-9_]+(?:_db|_database))\s+database",
                r"database\s+([a-zA-Z0-9_]+)",
                r"connect(?:ed)?\s+to\s+([a-zA-Z0-9_]+)",
            ]),
            table_patterns: compile(&[
                r"(?:sync|watch|monitor|track)\s+(?:the\s+)?([a-zA-Z0-9_\s]+?)(?:\s+table|\s+data|\s+events)",
                r"([a-zA-Z0-9_]+)\s+logs?",
                r"([a-zA-Z0-9_]+)\s+table",
                r"table\s+([a-zA-Z0-9_]+)",
            ]),
            filter_patterns: compile(&[
                r"only\s+(.+?)(?:\s+to\s+|\s+events?\b|\s+from\s+|$)",
                r"just\s+(.+?)(?:\s+to\s+|\s+events?\b|\s+from\s+|$)",
                r"filter\s+(?:for\s+)?(.+?)(?:\s+to\s+|\s+from\s+|$)",
                r"specific(?:ally)?\s+(.+?)(?:\s+to\s+|\s+from\s+|$)",
            ]),
            alert_patterns: compile(&[
                r"alert\s+when\s+(.+?)(?:\s+and\s+also|$)",
                r"notify\s+(?:me\s+)?when\s+(.+?)(?:\s+and\s+also|$)",
                r"monitor\s+(?:for\s+)?(.+?)(?:\s+and\s+also|$)",
                r"watch\s+(?:for\s+)?(.+?)(?:\s+and\s+also|$)",
                r"set\s+up\s+(?:an?\s+)?alert\s+(?:for\s+)?(.+?)(?:\s+and\s+also|$)",
            ]),
            aggregation_patterns: compile(&[
                r"count\s+(.+?)(?:\s+per\s+|\s+by\s+|$)",
                r"aggregate\s+(.+?)(?:\s+per\s+|\s+by\s+|$)",
                r"sum\s+(?:of\s+)?(.+?)(?:\s+per\s+|\s+by\s+|$)",
            ]),
        }
    }

    /// Extract every hint the message carries.
    pub fn extract(&self, message: &str) -> ExtractedRequirements {
        let message_lower = message.to_lowercase();

        ExtractedRequirements {
            source_hint: self.first_capture(&self.source_patterns, message),
            table_hint: self.extract_table_hint(message),
            filter_requirement: self.extract_filter(message, &message_lower),
            destination_hint: DESTINATION_KINDS
                .iter()
                .find(|d| message_lower.contains(*d))
                .map(|d| d.to_string()),
            alert_requirement: self.extract_alert(message, &message_lower),
            aggregation_requirement: self.extract_aggregation(message, &message_lower),
            raw_message: message.to_string(),
        }
    }

    fn first_capture(&self, patterns: &[Regex], message: &str) -> Option<String> {
        for pattern in patterns {
            if let Some(caps) = pattern.captures(message) {
                if let Some(m) = caps.get(1) {
                    return Some(m.as_str().trim().to_string());
                }
            }
        }
        None
    }

    fn extract_table_hint(&self, message: &str) -> Option<String> {
        // Space-separated hints become underscore table names:
        // "audit logs" -> "audit_logs".
        self.first_capture(&self.table_patterns, message)
            .map(|hint| hint.trim().replace(' ', "_"))
    }

    fn extract_filter(&self, message: &str, message_lower: &str) -> Option<String> {
        if !FILTER_KEYWORDS.iter().any(|kw| message_lower.contains(kw)) {
            return None;
        }

        if let Some(capture) = self.first_capture(&self.filter_patterns, message) {
            return Some(capture);
        }

        // Fallback: text following the first filter keyword, up to the next
        // major clause.
        for keyword in FILTER_KEYWORDS {
            if let Some(idx) = message_lower.find(keyword) {
                let after = message[idx + keyword.len()..].trim();
                let after_lower = after.to_lowercase();
                for end in [" to ", " and also ", " and set", " from ", " into "] {
                    if let Some(end_idx) = after_lower.find(end) {
                        return Some(after[..end_idx].trim().to_string());
                    }
                }
                let clipped: String = after.chars().take(50).collect();
                return Some(clipped.trim().to_string());
            }
        }

        None
    }

    fn extract_alert(&self, message: &str, message_lower: &str) -> Option<String> {
        if !ALERT_KEYWORDS.iter().any(|kw| message_lower.contains(kw)) {
            return None;
        }

        if let Some(capture) = self.first_capture(&self.alert_patterns, message) {
            return Some(capture);
        }

        if message_lower.contains("gap")
            || message_lower.contains("no logs")
            || message_lower.contains("no events")
        {
            return Some("gap_detection".to_string());
        }

        None
    }

    fn extract_aggregation(&self, message: &str, message_lower: &str) -> Option<String> {
        if !AGGREGATION_KEYWORDS.iter().any(|kw| message_lower.contains(kw)) {
            return None;
        }
        self.first_capture(&self.aggregation_patterns, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_audit_logs() {
        let extractor = RequirementExtractor::new();
        let requirements =
            extractor.extract("sync the audit logs table, only login and logout events");

        assert_eq!(requirements.table_hint.as_deref(), Some("audit_logs"));
        assert_eq!(
            requirements.filter_requirement.as_deref(),
            Some("login and logout")
        );
    }

    #[test]
    fn test_source_and_destination_hints() {
        let extractor = RequirementExtractor::new();
        let requirements = extractor
            .extract("stream changes from shop_db database into clickhouse");

        assert_eq!(requirements.source_hint.as_deref(), Some("shop_db"));
        assert_eq!(requirements.destination_hint.as_deref(), Some("clickhouse"));
    }

    #[test]
    fn test_alert_when_clause() {
        let extractor = RequirementExtractor::new();
        let requirements =
            extractor.extract("alert when no events arrive for 10 minutes");
        assert_eq!(
            requirements.alert_requirement.as_deref(),
            Some("no events arrive for 10 minutes")
        );
    }

    #[test]
    fn test_gap_shorthand() {
        let extractor = RequirementExtractor::new();
        let requirements = extractor.extract("I care about gaps in the log stream");
        assert_eq!(requirements.alert_requirement.as_deref(), Some("gap_detection"));
    }

    #[test]
    fn test_aggregation_hint() {
        let extractor = RequirementExtractor::new();
        let requirements = extractor.extract("count logins per hour");
        assert_eq!(requirements.aggregation_requirement.as_deref(), Some("logins"));
    }

    #[test]
    fn test_no_hints() {
        let extractor = RequirementExtractor::new();
        let requirements = extractor.extract("hello there");
        assert_eq!(requirements.table_hint, None);
        assert_eq!(requirements.filter_requirement, None);
        assert_eq!(requirements.alert_requirement, None);
    }
}
