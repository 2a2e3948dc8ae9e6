//! Resource tracker
//!
//! Ledger of every externally-created artifact per pipeline, kept in memory
//! for fast access and mirrored to the metadata store so teardown survives a
//! restart. Resources equal cost: a pipeline in `deleted` state must have no
//! tracked resource left `active`.

use crate::database::Database;
use crate::errors::Result;
use crate::models::{ResourceKind, ResourceStatus, TrackedResource};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Per-pipeline resource ledger.
pub struct ResourceTracker {
    database: Arc<Database>,
    pipelines: DashMap<String, HashMap<String, TrackedResource>>,
}

impl ResourceTracker {
    pub fn new(database: Arc<Database>) -> Self {
        Self {
            database,
            pipelines: DashMap::new(),
        }
    }

    /// Load a pipeline's ledger from the metadata store (recovery path).
    pub async fn hydrate(&self, pipeline_id: &str) -> Result<()> {
        let resources = self.database.list_resources(pipeline_id).await?;
        let mut map = HashMap::with_capacity(resources.len());
        for resource in resources {
            map.insert(resource.resource_id.clone(), resource);
        }
        self.pipelines.insert(pipeline_id.to_string(), map);
        Ok(())
    }

    /// Track a new resource. The row is durable before this returns.
    pub async fn track(
        &self,
        pipeline_id: &str,
        kind: ResourceKind,
        resource_id: &str,
        resource_name: &str,
        metadata: serde_json::Value,
        depends_on: Vec<String>,
    ) -> Result<TrackedResource> {
        let mut resource = TrackedResource::new(pipeline_id, kind, resource_id, resource_name);
        resource.metadata = metadata;
        resource.depends_on = depends_on;

        self.database.save_resource(&resource).await?;
        self.pipelines
            .entry(pipeline_id.to_string())
            .or_default()
            .insert(resource_id.to_string(), resource.clone());

        info!(
            "Tracked {}: {} for pipeline {}",
            kind.as_str(),
            resource_id,
            pipeline_id
        );
        Ok(resource)
    }

    /// Update a resource's status. `active` stamps created_at, `deleted`
    /// stamps deleted_at.
    pub async fn mark(
        &self,
        pipeline_id: &str,
        resource_id: &str,
        status: ResourceStatus,
        error: Option<String>,
    ) -> Result<()> {
        let updated = {
            let Some(mut entry) = self.pipelines.get_mut(pipeline_id) else {
                warn!("Pipeline not tracked: {}", pipeline_id);
                return Ok(());
            };
            let Some(resource) = entry.get_mut(resource_id) else {
                warn!("Resource not tracked: {} / {}", pipeline_id, resource_id);
                return Ok(());
            };

            resource.status = status;
            resource.error_message = error;
            match status {
                ResourceStatus::Active => resource.created_at = Some(Utc::now()),
                ResourceStatus::Deleted => resource.deleted_at = Some(Utc::now()),
                _ => {}
            }
            resource.clone()
        };

        self.database.save_resource(&updated).await?;
        Ok(())
    }

    pub async fn mark_active(&self, pipeline_id: &str, resource_id: &str) -> Result<()> {
        self.mark(pipeline_id, resource_id, ResourceStatus::Active, None).await
    }

    pub async fn mark_failed(
        &self,
        pipeline_id: &str,
        resource_id: &str,
        error: impl Into<String>,
    ) -> Result<()> {
        let error = error.into();
        warn!("Resource failed: {} - {}", resource_id, error);
        self.mark(pipeline_id, resource_id, ResourceStatus::Failed, Some(error))
            .await
    }

    pub async fn mark_deleted(&self, pipeline_id: &str, resource_id: &str) -> Result<()> {
        self.mark(pipeline_id, resource_id, ResourceStatus::Deleted, None).await
    }

    /// All tracked resources of a pipeline, any status.
    pub fn resources(&self, pipeline_id: &str) -> Vec<TrackedResource> {
        self.pipelines
            .get(pipeline_id)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, pipeline_id: &str, resource_id: &str) -> Option<TrackedResource> {
        self.pipelines.get(pipeline_id)?.get(resource_id).cloned()
    }

    /// Active resources of one kind.
    pub fn active_of_kind(&self, pipeline_id: &str, kind: ResourceKind) -> Vec<TrackedResource> {
        self.resources(pipeline_id)
            .into_iter()
            .filter(|r| r.kind == kind && r.status == ResourceStatus::Active)
            .collect()
    }

    /// Active resources in teardown order: the fixed kind order, and within
    /// a kind, resources with more dependents first.
    pub fn deletion_order(&self, pipeline_id: &str) -> Vec<TrackedResource> {
        order_for_deletion(&self.resources(pipeline_id))
    }

    /// Resources grouped by cost category.
    pub fn cost_relevant(&self, pipeline_id: &str) -> HashMap<&'static str, Vec<TrackedResource>> {
        let mut grouped: HashMap<&'static str, Vec<TrackedResource>> = HashMap::new();
        for resource in self.resources(pipeline_id) {
            if resource.status != ResourceStatus::Active {
                continue;
            }
            let bucket = match resource.kind {
                ResourceKind::SourceConnector | ResourceKind::SinkConnector => "connectors",
                ResourceKind::KafkaTopic => "topics",
                ResourceKind::KsqldbStream | ResourceKind::KsqldbTable => "processing",
                ResourceKind::ClickhouseTable | ResourceKind::ClickhouseDatabase => "storage",
                _ => continue,
            };
            grouped.entry(bucket).or_default().push(resource);
        }
        grouped
    }

    /// Resources needing operator attention after a teardown attempt.
    pub fn residuals(&self, pipeline_id: &str) -> Vec<TrackedResource> {
        self.resources(pipeline_id)
            .into_iter()
            .filter(|r| matches!(r.status, ResourceStatus::Failed | ResourceStatus::Orphaned))
            .collect()
    }

    /// True when nothing is left active.
    pub fn fully_reclaimed(&self, pipeline_id: &str) -> bool {
        !self
            .resources(pipeline_id)
            .iter()
            .any(|r| r.status == ResourceStatus::Active)
    }

    /// Drop the in-memory and durable ledger once cleanup finished.
    pub async fn forget(&self, pipeline_id: &str) -> Result<()> {
        self.pipelines.remove(pipeline_id);
        self.database.clear_resources(pipeline_id).await?;
        info!("Removed resource ledger for pipeline {}", pipeline_id);
        Ok(())
    }
}

/// Active resources in teardown order: the fixed kind order
/// ([`ResourceKind::DELETION_ORDER`]), and within a kind, resources with
/// more dependents first. Dependent counts consider the whole ledger, not
/// just active rows.
pub fn order_for_deletion(resources: &[TrackedResource]) -> Vec<TrackedResource> {
    let mut active: Vec<TrackedResource> = resources
        .iter()
        .filter(|r| r.status == ResourceStatus::Active)
        .cloned()
        .collect();

    let mut dependents: HashMap<&str, usize> = HashMap::new();
    for resource in resources {
        for dep in &resource.depends_on {
            *dependents.entry(dep.as_str()).or_default() += 1;
        }
    }

    active.sort_by(|a, b| {
        a.kind.deletion_rank().cmp(&b.kind.deletion_rank()).then_with(|| {
            let da = dependents.get(a.resource_id.as_str()).copied().unwrap_or(0);
            let db = dependents.get(b.resource_id.as_str()).copied().unwrap_or(0);
            db.cmp(&da)
        })
    });

    active
}
