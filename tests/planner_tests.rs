//! End-to-end planner scenarios: requirement extraction feeding the filter
//! planner, join planning, and cost projection.

use dataflow_hub::common::config::PricingConfig;
use dataflow_hub::conversation::RequirementExtractor;
use dataflow_hub::models::ColumnInfo;
use dataflow_hub::planner::cost::CostInputs;
use dataflow_hub::planner::{CostEstimator, FilterPlanner};
use pretty_assertions::assert_eq;

fn column(name: &str, data_type: &str) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable: true,
        ordinal: 0,
        is_primary_key: false,
    }
}

/// Spec scenario: "sync the audit logs table, only login and logout events"
/// over public.audit_logs(event_type VARCHAR) must yield
/// `event_type IN ('login','logout')` at decent confidence.
#[test]
fn test_utterance_to_predicate() {
    let extractor = RequirementExtractor::new();
    let requirements =
        extractor.extract("sync the audit logs table, only login and logout events");

    assert_eq!(requirements.table_hint.as_deref(), Some("audit_logs"));
    let filter_requirement = requirements.filter_requirement.unwrap();
    assert_eq!(filter_requirement, "login and logout");

    let columns = vec![
        column("id", "bigint"),
        column("event_type", "character varying"),
        column("created_at", "timestamp without time zone"),
    ];

    let planner = FilterPlanner::new();
    let config = planner.generate(&filter_requirement, &columns, None).unwrap();

    assert_eq!(config.column, "event_type");
    assert_eq!(config.operator, "IN");
    assert_eq!(config.values, vec!["login".to_string(), "logout".to_string()]);
    assert_eq!(config.sql_where, "event_type IN ('login', 'logout')");
    assert!(config.confidence >= 0.7);
}

/// Generating, re-reading the description, and re-planning produces the same
/// (column, operator, values) structure.
#[test]
fn test_filter_plan_is_reproducible() {
    let columns = vec![column("status", "text"), column("id", "bigint")];
    let planner = FilterPlanner::new();

    let first = planner.generate("only active and trial", &columns, None).unwrap();
    let second = planner.generate(&first.description, &columns, None).unwrap();

    assert_eq!(first.column, second.column);
    assert_eq!(first.operator, second.operator);
    assert_eq!(first.values, second.values);
    assert_eq!(first.sql_where, second.sql_where);
}

#[test]
fn test_cost_estimate_filter_savings_scale() {
    let estimator = CostEstimator::new(PricingConfig::default());

    let inputs = CostInputs {
        name: "audit sync".to_string(),
        tables: vec!["public.audit_logs".to_string()],
        row_count: 500_000_000,
        events_per_day: 0,
        avg_row_size_bytes: 300,
        has_filter: false,
        filter_reduction_percent: 75.0,
        has_aggregation: false,
        sink_kind: "clickhouse".to_string(),
        num_source_tasks: None,
        num_sink_tasks: None,
    };

    let comparison = estimator.compare_with_filter(&inputs);
    assert!(comparison.savings_daily > 0.0);
    assert!(comparison.savings_monthly > comparison.savings_daily);
    assert!((comparison.savings_yearly - comparison.savings_monthly * 12.0).abs() < 1e-9);
    assert!(comparison.savings_percent > 0.0 && comparison.savings_percent < 100.0);
}

#[test]
fn test_cost_estimate_tracks_task_counts() {
    let estimator = CostEstimator::new(PricingConfig::default());
    let inputs = CostInputs {
        name: "three tables".to_string(),
        tables: vec![
            "public.a".to_string(),
            "public.b".to_string(),
            "public.c".to_string(),
        ],
        row_count: 1000,
        sink_kind: "clickhouse".to_string(),
        ..Default::default()
    };

    let estimate = estimator.estimate(&inputs);
    let source = estimate
        .components
        .iter()
        .find(|c| c.name == "Source Connector")
        .unwrap();
    // One task per table by default.
    assert_eq!(source.quantity, 3.0);

    let sink = estimate
        .components
        .iter()
        .find(|c| c.name == "Sink Connector")
        .unwrap();
    assert_eq!(sink.quantity, 1.0);
}
