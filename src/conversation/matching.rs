//! Fuzzy matching of hints against catalog entries
//!
//! Scores user hints against existing credentials and discovered tables on a
//! 0-100 similarity scale. Credentials need 60 to auto-match; tables match
//! at 60 and are merely suggested at 40.

use crate::models::{Credential, DiscoveredTable};
use serde::Serialize;

/// Auto-match threshold for credentials and tables.
pub const MATCH_THRESHOLD: u32 = 60;
/// Tables at or above this score are offered as suggestions.
pub const SUGGEST_THRESHOLD: u32 = 40;

/// Similarity on a 0-100 scale (normalized Levenshtein).
pub fn similarity(a: &str, b: &str) -> u32 {
    if a.is_empty() && b.is_empty() {
        return 100;
    }
    (strsim::normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase()) * 100.0).round() as u32
}

/// Substring-aware similarity: a hint fully contained in the candidate (or
/// vice versa) scores at least 90.
pub fn partial_similarity(a: &str, b: &str) -> u32 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    if !a_lower.is_empty() && !b_lower.is_empty() {
        if a_lower.contains(&b_lower) || b_lower.contains(&a_lower) {
            return 90.max(similarity(a, b));
        }
    }
    similarity(a, b)
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredTable {
    pub schema_name: String,
    pub table_name: String,
    pub match_score: u32,
    pub suggested: bool,
}

/// Matches source hints against stored credentials.
pub struct SourceMatcher<'a> {
    credentials: &'a [Credential],
}

impl<'a> SourceMatcher<'a> {
    pub fn new(credentials: &'a [Credential]) -> Self {
        Self { credentials }
    }

    fn score(&self, hint: &str, credential: &Credential) -> u32 {
        let database_score = credential
            .database
            .as_deref()
            .map(|db| similarity(hint, db))
            .unwrap_or(0);
        let name_score = similarity(hint, &credential.name);
        let host_score = credential
            .host
            .as_deref()
            .map(|host| partial_similarity(hint, host))
            .unwrap_or(0);
        database_score.max(name_score).max(host_score)
    }

    /// Best credential at or above the threshold.
    pub fn find_match(&self, hint: &str) -> Option<&'a Credential> {
        if hint.is_empty() {
            return None;
        }

        self.credentials
            .iter()
            .map(|c| (self.score(hint, c), c))
            .filter(|(score, _)| *score >= MATCH_THRESHOLD)
            .max_by_key(|(score, _)| *score)
            .map(|(_, c)| c)
    }

    /// All credentials above a threshold, best first.
    pub fn find_all(&self, hint: &str, threshold: u32) -> Vec<(&'a Credential, u32)> {
        if hint.is_empty() {
            return vec![];
        }
        let mut matches: Vec<(&Credential, u32)> = self
            .credentials
            .iter()
            .map(|c| (c, self.score(hint, c)))
            .filter(|(_, score)| *score >= threshold)
            .collect();
        matches.sort_by(|a, b| b.1.cmp(&a.1));
        matches
    }
}

/// Matches table hints against discovered tables.
pub struct TableMatcher<'a> {
    tables: &'a [DiscoveredTable],
}

impl<'a> TableMatcher<'a> {
    pub fn new(tables: &'a [DiscoveredTable]) -> Self {
        Self { tables }
    }

    fn score(&self, hint: &str, table: &DiscoveredTable) -> u32 {
        let normalized = hint.replace(' ', "_");
        similarity(&normalized, &table.table_name)
            .max(partial_similarity(&normalized, &table.table_name))
    }

    /// Best table at or above the exact-match threshold.
    pub fn find_match(&self, hint: &str) -> Option<&'a DiscoveredTable> {
        if hint.is_empty() {
            return None;
        }
        self.tables
            .iter()
            .map(|t| (self.score(hint, t), t))
            .filter(|(score, _)| *score >= MATCH_THRESHOLD)
            .max_by_key(|(score, _)| *score)
            .map(|(_, t)| t)
    }

    /// Every table scored against the hint, best first, with the suggestion
    /// flag set at the lower threshold. An empty hint returns everything.
    pub fn rank(&self, hint: &str) -> Vec<ScoredTable> {
        let mut scored: Vec<ScoredTable> = self
            .tables
            .iter()
            .map(|t| {
                let score = if hint.is_empty() { 0 } else { self.score(hint, t) };
                ScoredTable {
                    schema_name: t.schema_name.clone(),
                    table_name: t.table_name.clone(),
                    match_score: score,
                    suggested: score >= SUGGEST_THRESHOLD,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.match_score.cmp(&a.match_score));
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn credential(name: &str, database: &str, host: &str) -> Credential {
        Credential {
            id: format!("c-{name}"),
            user_id: "u1".to_string(),
            name: name.to_string(),
            source_kind: "postgresql".to_string(),
            ciphertext: vec![],
            iv: vec![],
            tag: vec![],
            host: Some(host.to_string()),
            port: Some(5432),
            database: Some(database.to_string()),
            is_valid: true,
            last_validated_at: None,
            created_at: Utc::now(),
        }
    }

    fn table(name: &str) -> DiscoveredTable {
        DiscoveredTable {
            id: format!("t-{name}"),
            credential_id: "c1".to_string(),
            user_id: "u1".to_string(),
            schema_name: "public".to_string(),
            table_name: name.to_string(),
            columns: vec![],
            primary_keys: vec![],
            foreign_keys: vec![],
            row_count_estimate: None,
            table_size_bytes: None,
            has_primary_key: true,
            cdc_eligible: true,
            cdc_issues: vec![],
            replica_identity: "DEFAULT".to_string(),
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn test_similarity_scale() {
        assert_eq!(similarity("orders", "orders"), 100);
        assert!(similarity("orders", "order") >= 80);
        assert!(similarity("orders", "customers") < 60);
    }

    #[test]
    fn test_source_match_on_database_name() {
        let creds = vec![
            credential("prod shop", "shop", "db1.example"),
            credential("analytics", "metrics", "db2.example"),
        ];
        let matcher = SourceMatcher::new(&creds);
        let found = matcher.find_match("shop").unwrap();
        assert_eq!(found.database.as_deref(), Some("shop"));
    }

    #[test]
    fn test_source_no_match_below_threshold() {
        let creds = vec![credential("analytics", "metrics", "db2.example")];
        let matcher = SourceMatcher::new(&creds);
        assert!(matcher.find_match("zzzzzz").is_none());
        assert!(matcher.find_match("").is_none());
    }

    #[test]
    fn test_table_match_normalizes_spaces() {
        let tables = vec![table("audit_logs"), table("orders")];
        let matcher = TableMatcher::new(&tables);
        let found = matcher.find_match("audit logs").unwrap();
        assert_eq!(found.table_name, "audit_logs");
    }

    #[test]
    fn test_table_ranking_flags_suggestions() {
        let tables = vec![table("audit_logs"), table("orders"), table("users")];
        let matcher = TableMatcher::new(&tables);
        let ranked = matcher.rank("audit");
        assert_eq!(ranked[0].table_name, "audit_logs");
        assert!(ranked[0].suggested);
        // Everything is returned, even non-suggestions.
        assert_eq!(ranked.len(), 3);
    }
}
