//! Teardown-ordering tests for the resource ledger

use dataflow_hub::models::{ResourceKind, ResourceStatus, TrackedResource};
use dataflow_hub::pipeline::order_for_deletion;

fn resource(
    kind: ResourceKind,
    id: &str,
    status: ResourceStatus,
    depends_on: Vec<&str>,
) -> TrackedResource {
    let mut r = TrackedResource::new("p1", kind, id, id);
    r.status = status;
    r.depends_on = depends_on.into_iter().map(str::to_string).collect();
    r
}

#[test]
fn test_kind_order_is_fixed() {
    let resources = vec![
        resource(ResourceKind::KafkaTopic, "topic-a", ResourceStatus::Active, vec![]),
        resource(ResourceKind::SourceConnector, "src", ResourceStatus::Active, vec![]),
        resource(ResourceKind::DebeziumSlot, "slot", ResourceStatus::Active, vec![]),
        resource(ResourceKind::SinkConnector, "sink", ResourceStatus::Active, vec![]),
        resource(ResourceKind::KsqldbStream, "stream", ResourceStatus::Active, vec![]),
        resource(ResourceKind::ClickhouseTable, "ch", ResourceStatus::Active, vec![]),
        resource(ResourceKind::KsqldbTable, "tbl", ResourceStatus::Active, vec![]),
        resource(ResourceKind::AlertRule, "rule", ResourceStatus::Active, vec![]),
        resource(ResourceKind::DebeziumPublication, "pub", ResourceStatus::Active, vec![]),
    ];

    let ordered = order_for_deletion(&resources);
    let kinds: Vec<ResourceKind> = ordered.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ResourceKind::SinkConnector,
            ResourceKind::AlertRule,
            ResourceKind::KsqldbTable,
            ResourceKind::KsqldbStream,
            ResourceKind::SourceConnector,
            ResourceKind::KafkaTopic,
            ResourceKind::ClickhouseTable,
            ResourceKind::DebeziumSlot,
            ResourceKind::DebeziumPublication,
        ]
    );
}

#[test]
fn test_every_pair_respects_kind_ranks() {
    let resources = vec![
        resource(ResourceKind::KafkaTopic, "t", ResourceStatus::Active, vec![]),
        resource(ResourceKind::SinkConnector, "sink", ResourceStatus::Active, vec![]),
        resource(ResourceKind::SourceConnector, "src", ResourceStatus::Active, vec![]),
    ];
    let ordered = order_for_deletion(&resources);
    for (i, a) in ordered.iter().enumerate() {
        for b in &ordered[i + 1..] {
            assert!(a.kind.deletion_rank() <= b.kind.deletion_rank());
        }
    }
}

#[test]
fn test_non_active_resources_excluded() {
    let resources = vec![
        resource(ResourceKind::KafkaTopic, "active", ResourceStatus::Active, vec![]),
        resource(ResourceKind::KafkaTopic, "deleted", ResourceStatus::Deleted, vec![]),
        resource(ResourceKind::KafkaTopic, "failed", ResourceStatus::Failed, vec![]),
        resource(ResourceKind::KafkaTopic, "pending", ResourceStatus::Pending, vec![]),
    ];
    let ordered = order_for_deletion(&resources);
    assert_eq!(ordered.len(), 1);
    assert_eq!(ordered[0].resource_id, "active");
}

#[test]
fn test_more_dependents_first_within_kind() {
    // Two topics: everything depends on "hub", nothing on "leaf".
    let resources = vec![
        resource(ResourceKind::KafkaTopic, "leaf", ResourceStatus::Active, vec![]),
        resource(ResourceKind::KafkaTopic, "hub", ResourceStatus::Active, vec![]),
        resource(ResourceKind::KsqldbStream, "s1", ResourceStatus::Active, vec!["hub"]),
        resource(ResourceKind::KsqldbStream, "s2", ResourceStatus::Active, vec!["hub"]),
    ];

    let ordered = order_for_deletion(&resources);
    let topics: Vec<&str> = ordered
        .iter()
        .filter(|r| r.kind == ResourceKind::KafkaTopic)
        .map(|r| r.resource_id.as_str())
        .collect();
    assert_eq!(topics, vec!["hub", "leaf"]);
}

#[test]
fn test_empty_ledger_orders_nothing() {
    assert!(order_for_deletion(&[]).is_empty());
}
