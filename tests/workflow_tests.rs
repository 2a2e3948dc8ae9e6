//! Conversation-flow tests: extraction, fuzzy matching, and the workflow
//! cursor working together.

use chrono::Utc;
use dataflow_hub::conversation::{
    ContextStore, RequirementExtractor, SourceMatcher, TableMatcher, WorkflowStep,
};
use dataflow_hub::models::{Credential, DiscoveredTable};

fn credential(name: &str, database: &str) -> Credential {
    Credential {
        id: format!("c-{name}"),
        user_id: "u1".to_string(),
        name: name.to_string(),
        source_kind: "postgresql".to_string(),
        ciphertext: vec![],
        iv: vec![],
        tag: vec![],
        host: Some("db.example".to_string()),
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
        credential_id: "c-audit".to_string(),
        user_id: "u1".to_string(),
        schema_name: "public".to_string(),
        table_name: name.to_string(),
        columns: vec![],
        primary_keys: vec!["id".to_string()],
        foreign_keys: vec![],
        row_count_estimate: Some(5000),
        table_size_bytes: None,
        has_primary_key: true,
        cdc_eligible: true,
        cdc_issues: vec![],
        replica_identity: "DEFAULT".to_string(),
        discovered_at: Utc::now(),
    }
}

#[test]
fn test_hints_resolve_against_catalog() {
    let extractor = RequirementExtractor::new();
    let requirements = extractor
        .extract("sync the audit logs table from audit_db database, only login and logout events");

    let credentials = vec![credential("prod audit", "audit_db"), credential("other", "shop")];
    let source = SourceMatcher::new(&credentials)
        .find_match(requirements.source_hint.as_deref().unwrap())
        .expect("source should match");
    assert_eq!(source.database.as_deref(), Some("audit_db"));

    let tables = vec![table("audit_logs"), table("orders")];
    let matched = TableMatcher::new(&tables)
        .find_match(requirements.table_hint.as_deref().unwrap())
        .expect("table should match");
    assert_eq!(matched.table_name, "audit_logs");
}

#[test]
fn test_cursor_walks_the_flow_and_evicts() {
    let store = ContextStore::new();
    let context = store.get("session-1", "u1");

    {
        let mut ctx = context.lock();
        let extractor = RequirementExtractor::new();
        ctx.set_original_request(
            "sync orders to clickhouse",
            extractor.extract("sync orders to clickhouse"),
        );

        for step in WorkflowStep::ORDER {
            ctx.advance_to(step);
        }
        assert_eq!(ctx.current_step, Some(WorkflowStep::FinalConfirmation));
        assert_eq!(ctx.completed_steps.len(), 10);

        ctx.set_pipeline("p-123");
    }

    // Pipeline created: the context is evicted.
    store.evict("session-1", "u1");
    assert!(store.is_empty());

    // A fresh context starts clean.
    let fresh = store.get("session-1", "u1");
    assert!(fresh.lock().pipeline_id.is_none());
}

#[test]
fn test_going_back_reopens_later_steps() {
    let store = ContextStore::new();
    let context = store.get("s", "u");
    let mut ctx = context.lock();

    for step in [
        WorkflowStep::SourceIdentification,
        WorkflowStep::TableSelection,
        WorkflowStep::DataFilter,
        WorkflowStep::SchemaValidation,
        WorkflowStep::TopicNaming,
    ] {
        ctx.advance_to(step);
    }

    ctx.go_back_to(WorkflowStep::DataFilter);
    assert_eq!(ctx.current_step, Some(WorkflowStep::DataFilter));
    assert_eq!(
        ctx.completed_steps,
        vec![
            WorkflowStep::SourceIdentification,
            WorkflowStep::TableSelection
        ]
    );
}
