//! Conversation state for the stepwise pipeline-construction flow
//!
//! A per-session workflow cursor walks the 11-step creation flow, carrying
//! the original request, extracted requirements, and every confirmed
//! configuration until the pipeline is created (or the user cancels), at
//! which point the context is evicted. Contexts are keyed by
//! `(session_id, user_id)`.

pub mod extract;
pub mod matching;

pub use extract::{ExtractedRequirements, RequirementExtractor};
pub use matching::{ScoredTable, SourceMatcher, TableMatcher, MATCH_THRESHOLD, SUGGEST_THRESHOLD};

use crate::planner::{CostEstimate, FilterConfig};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Ordered steps of the pipeline-construction flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    SourceIdentification,
    TableSelection,
    DataFilter,
    SchemaValidation,
    TopicNaming,
    DestinationSelection,
    DestinationSchema,
    ResourceCreation,
    AlertConfiguration,
    CostEstimation,
    FinalConfirmation,
}

impl WorkflowStep {
    pub const ORDER: [WorkflowStep; 11] = [
        Self::SourceIdentification,
        Self::TableSelection,
        Self::DataFilter,
        Self::SchemaValidation,
        Self::TopicNaming,
        Self::DestinationSelection,
        Self::DestinationSchema,
        Self::ResourceCreation,
        Self::AlertConfiguration,
        Self::CostEstimation,
        Self::FinalConfirmation,
    ];

    pub fn position(&self) -> usize {
        Self::ORDER.iter().position(|s| s == self).unwrap_or(0)
    }

    pub fn next(&self) -> Option<WorkflowStep> {
        Self::ORDER.get(self.position() + 1).copied()
    }
}

/// Confirmed source selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSelection {
    pub credential_id: Option<String>,
    pub credential_name: Option<String>,
    pub source_kind: Option<String>,
    pub host: Option<String>,
    pub database: Option<String>,
}

/// Confirmed table selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSelection {
    pub schema_name: String,
    pub table_name: String,
    pub row_count_estimate: i64,
}

/// Confirmed destination selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationSelection {
    pub destination_kind: Option<String>,
    pub database: Option<String>,
    pub table_name: Option<String>,
}

/// Confirmed alert selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSelection {
    pub alert_kind: String,
    pub threshold: serde_json::Value,
    pub severity: String,
    pub recipients: Vec<String>,
}

/// Per-session workflow state.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowContext {
    pub session_id: String,
    pub user_id: String,
    pub original_request: String,
    pub requirements: ExtractedRequirements,
    pub current_step: Option<WorkflowStep>,
    pub completed_steps: Vec<WorkflowStep>,
    pub source: SourceSelection,
    pub tables: Vec<TableSelection>,
    pub filters: Vec<FilterConfig>,
    pub destination: DestinationSelection,
    pub alerts: Vec<AlertSelection>,
    pub cost_estimate: Option<CostEstimate>,
    pub pipeline_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowContext {
    fn new(session_id: &str, user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            original_request: String::new(),
            requirements: ExtractedRequirements::default(),
            current_step: None,
            completed_steps: Vec::new(),
            source: SourceSelection::default(),
            tables: Vec::new(),
            filters: Vec::new(),
            destination: DestinationSelection::default(),
            alerts: Vec::new(),
            cost_estimate: None,
            pipeline_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn set_original_request(&mut self, message: &str, requirements: ExtractedRequirements) {
        self.original_request = message.to_string();
        self.requirements = requirements;
        self.touch();
    }

    /// Advance the cursor; the step being left is recorded as completed.
    pub fn advance_to(&mut self, step: WorkflowStep) {
        if let Some(current) = self.current_step {
            if !self.completed_steps.contains(&current) {
                self.completed_steps.push(current);
            }
        }
        self.current_step = Some(step);
        self.touch();
    }

    /// Go back: the target step and everything after it lose their
    /// completed status.
    pub fn go_back_to(&mut self, step: WorkflowStep) {
        if let Some(index) = self.completed_steps.iter().position(|s| *s == step) {
            self.completed_steps.truncate(index);
        }
        self.current_step = Some(step);
        self.touch();
    }

    pub fn mark_completed(&mut self, step: WorkflowStep) {
        if !self.completed_steps.contains(&step) {
            self.completed_steps.push(step);
        }
        self.touch();
    }

    pub fn set_source(&mut self, source: SourceSelection) {
        self.source = source;
        self.touch();
    }

    pub fn set_tables(&mut self, tables: Vec<TableSelection>) {
        self.tables = tables;
        self.touch();
    }

    pub fn add_filter(&mut self, filter: FilterConfig) {
        self.filters.push(filter);
        self.touch();
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
        self.touch();
    }

    pub fn set_destination(&mut self, destination: DestinationSelection) {
        self.destination = destination;
        self.touch();
    }

    pub fn add_alert(&mut self, alert: AlertSelection) {
        self.alerts.push(alert);
        self.touch();
    }

    pub fn set_cost_estimate(&mut self, estimate: CostEstimate) {
        self.cost_estimate = Some(estimate);
        self.touch();
    }

    pub fn set_pipeline(&mut self, pipeline_id: &str) {
        self.pipeline_id = Some(pipeline_id.to_string());
        self.touch();
    }

    /// Human-readable summary of what has been confirmed so far.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if let Some(name) = &self.source.credential_name {
            parts.push(format!(
                "Source: {} ({})",
                name,
                self.source.database.as_deref().unwrap_or("?")
            ));
        }
        if !self.tables.is_empty() {
            let names: Vec<String> = self
                .tables
                .iter()
                .map(|t| format!("{}.{}", t.schema_name, t.table_name))
                .collect();
            parts.push(format!("Tables: {}", names.join(", ")));
        }
        if !self.filters.is_empty() {
            let descriptions: Vec<&str> =
                self.filters.iter().map(|f| f.description.as_str()).collect();
            parts.push(format!("Filters: {}", descriptions.join(", ")));
        }
        if let Some(kind) = &self.destination.destination_kind {
            parts.push(format!("Destination: {kind}"));
        }
        if !self.alerts.is_empty() {
            let kinds: Vec<&str> = self.alerts.iter().map(|a| a.alert_kind.as_str()).collect();
            parts.push(format!("Alerts: {}", kinds.join(", ")));
        }
        if let Some(estimate) = &self.cost_estimate {
            parts.push(format!("Estimated cost: ${:.2}/day", estimate.daily_total));
        }

        if parts.is_empty() {
            "No configuration yet".to_string()
        } else {
            parts.join("\n")
        }
    }
}

/// In-memory store of workflow contexts keyed by `(session_id, user_id)`.
#[derive(Default)]
pub struct ContextStore {
    contexts: DashMap<(String, String), Arc<parking_lot::Mutex<WorkflowContext>>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the context for a session.
    pub fn get(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Arc<parking_lot::Mutex<WorkflowContext>> {
        self.contexts
            .entry((session_id.to_string(), user_id.to_string()))
            .or_insert_with(|| {
                Arc::new(parking_lot::Mutex::new(WorkflowContext::new(session_id, user_id)))
            })
            .clone()
    }

    /// Evict a context after pipeline creation or explicit cancel.
    pub fn evict(&self, session_id: &str, user_id: &str) {
        if self
            .contexts
            .remove(&(session_id.to_string(), user_id.to_string()))
            .is_some()
        {
            info!("Evicted conversation context for session {}", session_id);
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order() {
        assert_eq!(WorkflowStep::SourceIdentification.position(), 0);
        assert_eq!(WorkflowStep::FinalConfirmation.position(), 10);
        assert_eq!(
            WorkflowStep::SourceIdentification.next(),
            Some(WorkflowStep::TableSelection)
        );
        assert_eq!(WorkflowStep::FinalConfirmation.next(), None);
    }

    #[test]
    fn test_advance_records_completed() {
        let mut context = WorkflowContext::new("s1", "u1");
        context.advance_to(WorkflowStep::SourceIdentification);
        context.advance_to(WorkflowStep::TableSelection);
        context.advance_to(WorkflowStep::DataFilter);

        assert_eq!(context.current_step, Some(WorkflowStep::DataFilter));
        assert_eq!(
            context.completed_steps,
            vec![
                WorkflowStep::SourceIdentification,
                WorkflowStep::TableSelection
            ]
        );
    }

    #[test]
    fn test_go_back_truncates() {
        let mut context = WorkflowContext::new("s1", "u1");
        for step in [
            WorkflowStep::SourceIdentification,
            WorkflowStep::TableSelection,
            WorkflowStep::DataFilter,
            WorkflowStep::SchemaValidation,
        ] {
            context.advance_to(step);
        }
        // Completed: source, table, filter. Current: schema validation.
        context.go_back_to(WorkflowStep::TableSelection);

        assert_eq!(context.current_step, Some(WorkflowStep::TableSelection));
        assert_eq!(
            context.completed_steps,
            vec![WorkflowStep::SourceIdentification]
        );
    }

    #[test]
    fn test_store_keyed_by_session_and_user() {
        let store = ContextStore::new();
        let a = store.get("s1", "u1");
        let b = store.get("s1", "u2");
        let a_again = store.get("s1", "u1");

        a.lock().set_pipeline("p1");
        assert_eq!(a_again.lock().pipeline_id.as_deref(), Some("p1"));
        assert!(b.lock().pipeline_id.is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_eviction() {
        let store = ContextStore::new();
        store.get("s1", "u1");
        store.evict("s1", "u1");
        assert!(store.is_empty());
    }

    #[test]
    fn test_summary_reflects_confirmations() {
        let mut context = WorkflowContext::new("s1", "u1");
        assert_eq!(context.summary(), "No configuration yet");

        context.set_source(SourceSelection {
            credential_id: Some("c1".to_string()),
            credential_name: Some("prod shop".to_string()),
            source_kind: Some("postgresql".to_string()),
            host: Some("db.example".to_string()),
            database: Some("shop".to_string()),
        });
        context.set_tables(vec![TableSelection {
            schema_name: "public".to_string(),
            table_name: "orders".to_string(),
            row_count_estimate: 1000,
        }]);

        let summary = context.summary();
        assert!(summary.contains("Source: prod shop (shop)"));
        assert!(summary.contains("Tables: public.orders"));
    }
}
