//! Pipeline orchestrator
//!
//! The pipeline state machine: create → start (source connector → derived
//! streams → enrichments → sink) → pause/resume → stop → delete (ordered
//! teardown). All external names derive from the pipeline id with separators
//! stripped, so a recovering control plane reattaches to the same resources
//! instead of leaking them.
//!
//! Transitions for one pipeline are serialized by a per-pipeline lock; there
//! is no concurrency between the steps of a single transition. External-call
//! failures during `start` are not retried: the pipeline goes to `failed`
//! and everything already provisioned stays in the tracker so `delete` can
//! reclaim it.

use crate::common::config::PricingConfig;
use crate::database::Database;
use crate::discovery::{connect_source, SchemaDiscovery};
use crate::errors::{DataflowError, Result};
use crate::infra::{ClickHouseClient, ConnectClient, ProcessorClient, SchemaRegistryClient, TopicManager};
use crate::models::{
    Pipeline, PipelineEvent, PipelineEventKind, PipelineSpec, PipelineStatus, ResourceKind,
    TrackedResource,
};
use crate::modules::ModuleRegistry;
use crate::pipeline::enrichment::EnrichmentService;
use crate::pipeline::tracker::ResourceTracker;
use crate::vault::CredentialVault;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Teardown options. Destination data is retained unless asked for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteOptions {
    #[serde(default)]
    pub delete_destination_data: bool,
}

/// Outcome of one resource teardown.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupOutcome {
    pub resource_id: String,
    pub kind: ResourceKind,
    pub success: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Report for a pipeline deletion.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub pipeline_id: String,
    pub success: bool,
    pub cleaned: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<CleanupOutcome>,
    pub daily_savings: f64,
    pub monthly_savings: f64,
    pub yearly_savings: f64,
}

/// The central state machine over pipelines and their external resources.
pub struct PipelineOrchestrator {
    database: Arc<Database>,
    vault: Arc<CredentialVault>,
    registry: Arc<RwLock<ModuleRegistry>>,
    connect: Arc<ConnectClient>,
    processor: Arc<ProcessorClient>,
    schema_registry: Arc<SchemaRegistryClient>,
    topics: Arc<TopicManager>,
    clickhouse: Arc<ClickHouseClient>,
    tracker: Arc<ResourceTracker>,
    discovery: Arc<SchemaDiscovery>,
    enrichments: Arc<EnrichmentService>,
    pricing: PricingConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PipelineOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        database: Arc<Database>,
        vault: Arc<CredentialVault>,
        registry: Arc<RwLock<ModuleRegistry>>,
        connect: Arc<ConnectClient>,
        processor: Arc<ProcessorClient>,
        schema_registry: Arc<SchemaRegistryClient>,
        topics: Arc<TopicManager>,
        clickhouse: Arc<ClickHouseClient>,
        tracker: Arc<ResourceTracker>,
        discovery: Arc<SchemaDiscovery>,
        enrichments: Arc<EnrichmentService>,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            database,
            vault,
            registry,
            connect,
            processor,
            schema_registry,
            topics,
            clickhouse,
            tracker,
            discovery,
            enrichments,
            pricing,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, pipeline_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(pipeline_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Validate the spec and persist the pipeline in `pending`.
    /// No external side effects.
    #[instrument(skip(self, spec))]
    pub async fn create(&self, spec: PipelineSpec) -> Result<Pipeline> {
        if spec.source_tables.is_empty() {
            return Err(DataflowError::Validation(
                "at least one source table is required".to_string(),
            ));
        }

        self.database
            .get_credential(&spec.user_id, &spec.source_credential_id)
            .await?
            .ok_or_else(|| {
                DataflowError::NotFound(format!("credential {}", spec.source_credential_id))
            })?;

        // The sink must be a known module.
        self.registry.read().get_sink(&spec.sink_kind)?;

        if let Some(template_id) = &spec.template_id {
            self.database
                .get_template(&spec.user_id, template_id)
                .await?
                .ok_or_else(|| DataflowError::NotFound(format!("template {template_id}")))?;
        }

        let now = Utc::now();
        let pipeline = Pipeline {
            id: Uuid::new_v4().to_string(),
            user_id: spec.user_id,
            name: spec.name,
            description: spec.description,
            source_credential_id: spec.source_credential_id,
            source_tables: spec.source_tables,
            source_connector_name: None,
            sink_kind: spec.sink_kind,
            sink_config: spec.sink_config,
            sink_connector_name: None,
            template_id: spec.template_id,
            filter_config: spec.filter_config,
            status: PipelineStatus::Pending,
            last_health_check: None,
            error_message: None,
            metrics_cache: None,
            metrics_updated_at: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            stopped_at: None,
            deleted_at: None,
        };

        self.database.insert_pipeline(&pipeline).await?;
        self.journal(&pipeline.id, PipelineEventKind::Created, "Pipeline created", None)
            .await?;

        info!("Created pipeline {} ({})", pipeline.name, pipeline.id);
        Ok(pipeline)
    }

    /// Provision everything and drive the pipeline to `running`.
    #[instrument(skip(self))]
    pub async fn start(&self, pipeline_id: &str) -> Result<Pipeline> {
        let lock = self.lock_for(pipeline_id);
        let _guard = lock.lock().await;

        let pipeline = self.must_get(pipeline_id).await?;
        if !pipeline.status.can_start() {
            return Err(DataflowError::InvalidTransition(format!(
                "cannot start pipeline in state '{}'",
                pipeline.status
            )));
        }

        match self.provision(&pipeline).await {
            Ok(()) => {
                let event = self.event(pipeline_id, PipelineEventKind::Started, "Pipeline started");
                self.database
                    .transition_with_resources(pipeline_id, Some(PipelineStatus::Running), &event, &[])
                    .await?;
                info!("Pipeline {} running", pipeline_id);
                self.must_get(pipeline_id).await
            }
            Err(e) => {
                error!("Pipeline {} start failed: {}", pipeline_id, e);
                let event = self.event(
                    pipeline_id,
                    PipelineEventKind::Failed,
                    &format!("Start failed: {e}"),
                );
                self.database
                    .record_failure(pipeline_id, &e.to_string(), &event)
                    .await?;
                Err(e)
            }
        }
    }

    async fn provision(&self, pipeline: &Pipeline) -> Result<()> {
        let uid = pipeline.unique_id();
        let names = ResourceNames::for_unique_id(&uid);

        // 1. Source connector. Failure aborts before any sink provisioning.
        self.provision_source_connector(pipeline, &names).await?;

        // 2. Filtered derived streams, when the spec carries a predicate.
        // Either way the sink-destined topics come from
        // `sink_topic_for_table`, the same derivation verification uses.
        let sink_topics = if let Some(where_clause) = filter_predicate(pipeline) {
            self.provision_filter_streams(pipeline, &names, where_clause).await?
        } else {
            pipeline
                .source_tables
                .iter()
                .map(|t| sink_topic_for_table(pipeline, t))
                .collect()
        };

        // 3. Enrichments planned for this pipeline.
        for enrichment in self.database.list_enrichments(&pipeline.id).await? {
            if enrichment.status == crate::models::EnrichmentStatus::Pending {
                self.enrichments.activate(&enrichment.id).await?;
            }
        }

        // 4. Sink tables + sink connector over the sink-destined topics.
        self.provision_sink(pipeline, &names, &sink_topics).await?;

        Ok(())
    }

    async fn provision_source_connector(
        &self,
        pipeline: &Pipeline,
        names: &ResourceNames,
    ) -> Result<()> {
        let credential = self
            .database
            .get_credential(&pipeline.user_id, &pipeline.source_credential_id)
            .await?
            .ok_or_else(|| {
                DataflowError::NotFound(format!("credential {}", pipeline.source_credential_id))
            })?;
        let secret = self
            .vault
            .open(&pipeline.user_id, &pipeline.source_credential_id)
            .await?;

        let context = serde_json::json!({
            "credentials": {
                "host": secret.host,
                "port": secret.port,
                "database": secret.database,
                "username": secret.username,
                "password": secret.password,
            },
            "pipeline": {
                "id": pipeline.id,
                "topic_prefix": names.topic_prefix,
                "slot_name": names.slot,
                "publication_name": names.publication,
            },
            "tables": pipeline.source_tables,
        });

        let config = self
            .registry
            .read()
            .render_connector_config(&credential.source_kind, &context)?;

        // Ledger entries first: if the submit fails mid-flight the resource
        // is still known and reclaimable.
        self.tracker
            .track(
                &pipeline.id,
                ResourceKind::SourceConnector,
                &names.source_connector,
                &format!("CDC source for {}", pipeline.name),
                serde_json::json!({"tables": pipeline.source_tables}),
                vec![],
            )
            .await?;
        self.tracker
            .track(
                &pipeline.id,
                ResourceKind::DebeziumSlot,
                &names.slot,
                "replication slot",
                serde_json::json!({"credential_id": pipeline.source_credential_id}),
                vec![],
            )
            .await?;
        self.tracker
            .track(
                &pipeline.id,
                ResourceKind::DebeziumPublication,
                &names.publication,
                "replication publication",
                serde_json::json!({"credential_id": pipeline.source_credential_id}),
                vec![],
            )
            .await?;

        match self.connect.create_connector(&names.source_connector, &config).await {
            Ok(_) => {
                self.tracker
                    .mark_active(&pipeline.id, &names.source_connector)
                    .await?;
                self.tracker.mark_active(&pipeline.id, &names.slot).await?;
                self.tracker.mark_active(&pipeline.id, &names.publication).await?;
            }
            Err(e) => {
                self.tracker
                    .mark_failed(&pipeline.id, &names.source_connector, e.to_string())
                    .await?;
                return Err(e);
            }
        }

        // The connector creates one CDC topic per table under the prefix;
        // they are ours to reclaim.
        for table in &pipeline.source_tables {
            let topic = pipeline.topic_for_table(table);
            self.tracker
                .track(
                    &pipeline.id,
                    ResourceKind::KafkaTopic,
                    &topic,
                    &format!("CDC topic for {table}"),
                    serde_json::Value::Null,
                    vec![names.source_connector.clone()],
                )
                .await?;
            self.tracker.mark_active(&pipeline.id, &topic).await?;
        }

        self.database
            .set_connector_names(&pipeline.id, Some(&names.source_connector), None)
            .await?;

        Ok(())
    }

    /// Create a base stream plus a filtered derived stream per source topic.
    /// Returns the filtered topics, which become the sink-destined topics.
    async fn provision_filter_streams(
        &self,
        pipeline: &Pipeline,
        names: &ResourceNames,
        where_clause: &str,
    ) -> Result<Vec<String>> {
        let discovered = self
            .discovery
            .cached(&pipeline.user_id, &pipeline.source_credential_id)
            .await?;

        let mut filtered_topics = Vec::with_capacity(pipeline.source_tables.len());

        for table in &pipeline.source_tables {
            let topic = pipeline.topic_for_table(table);
            let sanitized = sanitize(table);
            let stream_name = format!("stream_{}_{}", names.short_id, sanitized);
            let filtered_stream = format!("filtered_{}_{}", names.short_id, sanitized);
            let filtered_topic = sink_topic_for_table(pipeline, table);

            // Prefer the schema the connector registered; declaring columns
            // again would register a duplicate subject on recreation.
            let schema_id = self
                .schema_registry
                .wait_for_value_schema_id(&topic, 5, Duration::from_secs(2))
                .await;

            let columns = discovered
                .iter()
                .find(|t| t.qualified_name() == *table)
                .map(|t| {
                    t.columns
                        .iter()
                        .map(|c| crate::models::enrichment::JoinColumn {
                            name: c.name.clone(),
                            data_type: processor_type(&c.data_type),
                            nullable: c.nullable,
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            if schema_id.is_none() && columns.is_empty() {
                return Err(DataflowError::Validation(format!(
                    "no registered schema and no discovered columns for {table}; run schema discovery first"
                )));
            }

            let base = self
                .processor
                .create_stream(&stream_name, &topic, &columns, "AVRO", schema_id)
                .await?;
            self.tracker
                .track(
                    &pipeline.id,
                    ResourceKind::KsqldbStream,
                    &base.name,
                    &format!("base stream for {table}"),
                    serde_json::json!({"topic": topic}),
                    vec![],
                )
                .await?;
            self.tracker.mark_active(&pipeline.id, &base.name).await?;

            let filtered = self
                .processor
                .create_filtered_stream(
                    &stream_name,
                    &filtered_stream,
                    where_clause,
                    None,
                    Some(&filtered_topic),
                )
                .await?;
            self.tracker
                .track(
                    &pipeline.id,
                    ResourceKind::KsqldbStream,
                    &filtered.name,
                    &format!("filtered stream for {table}"),
                    serde_json::json!({"topic": filtered_topic, "query_id": filtered.query_id, "where": where_clause}),
                    vec![base.name.clone()],
                )
                .await?;
            self.tracker.mark_active(&pipeline.id, &filtered.name).await?;

            self.tracker
                .track(
                    &pipeline.id,
                    ResourceKind::KafkaTopic,
                    &filtered_topic,
                    &format!("filtered topic for {table}"),
                    serde_json::Value::Null,
                    vec![filtered.name.clone()],
                )
                .await?;
            self.tracker.mark_active(&pipeline.id, &filtered_topic).await?;

            filtered_topics.push(filtered_topic);
        }

        Ok(filtered_topics)
    }

    async fn provision_sink(
        &self,
        pipeline: &Pipeline,
        names: &ResourceNames,
        sink_topics: &[String],
    ) -> Result<()> {
        let discovered = self
            .discovery
            .cached(&pipeline.user_id, &pipeline.source_credential_id)
            .await?;

        // One sink table per sink-destined topic; the sink connector maps a
        // topic onto the table of the same (sanitized) name.
        for (table, topic) in pipeline.source_tables.iter().zip(sink_topics.iter()) {
            let sink_table = sanitize(topic);
            let columns = discovered
                .iter()
                .find(|t| t.qualified_name() == *table)
                .map(|t| t.columns.clone())
                .ok_or_else(|| {
                    DataflowError::Validation(format!(
                        "no discovered schema for {table}; run schema discovery first"
                    ))
                })?;

            self.tracker
                .track(
                    &pipeline.id,
                    ResourceKind::ClickhouseTable,
                    &sink_table,
                    &format!("sink table for {table}"),
                    serde_json::json!({"database": self.clickhouse.database, "topic": topic}),
                    vec![topic.clone()],
                )
                .await?;

            match self.clickhouse.create_table(&sink_table, &columns, None).await {
                Ok(_) => self.tracker.mark_active(&pipeline.id, &sink_table).await?,
                Err(e) => {
                    self.tracker
                        .mark_failed(&pipeline.id, &sink_table, e.to_string())
                        .await?;
                    return Err(e);
                }
            }
        }

        let sink_config = self.sink_connector_config(pipeline, sink_topics);

        self.tracker
            .track(
                &pipeline.id,
                ResourceKind::SinkConnector,
                &names.sink_connector,
                &format!("{} sink for {}", pipeline.sink_kind, pipeline.name),
                serde_json::json!({"topics": sink_topics}),
                sink_topics.to_vec(),
            )
            .await?;

        match self.connect.create_connector(&names.sink_connector, &sink_config).await {
            Ok(_) => {
                self.tracker.mark_active(&pipeline.id, &names.sink_connector).await?;
            }
            Err(e) => {
                self.tracker
                    .mark_failed(&pipeline.id, &names.sink_connector, e.to_string())
                    .await?;
                return Err(e);
            }
        }

        self.database
            .set_connector_names(
                &pipeline.id,
                Some(&names.source_connector),
                Some(&names.sink_connector),
            )
            .await?;

        Ok(())
    }

    fn sink_connector_config(
        &self,
        pipeline: &Pipeline,
        topics: &[String],
    ) -> BTreeMap<String, String> {
        let sink = &pipeline.sink_config;
        let get = |key: &str, default: &str| {
            sink.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or(default)
                .to_string()
        };

        let mut config = BTreeMap::new();
        config.insert(
            "connector.class".to_string(),
            "com.clickhouse.kafka.connect.ClickHouseSinkConnector".to_string(),
        );
        config.insert("tasks.max".to_string(), "1".to_string());
        config.insert("topics".to_string(), topics.join(","));
        config.insert("hostname".to_string(), get("host", "localhost"));
        config.insert(
            "port".to_string(),
            sink.get("port")
                .and_then(|v| v.as_i64())
                .unwrap_or(8123)
                .to_string(),
        );
        config.insert("database".to_string(), get("database", &self.clickhouse.database));
        config.insert("username".to_string(), get("username", "default"));
        config.insert("password".to_string(), get("password", ""));
        config.insert("ssl".to_string(), "false".to_string());
        config.insert("exactlyOnce".to_string(), "false".to_string());
        config.insert("errors.tolerance".to_string(), "none".to_string());
        config.insert("errors.log.enable".to_string(), "true".to_string());
        config
    }

    /// Pause both connectors. The pipeline transitions if at least one pause
    /// succeeded; per-resource failures do not stop the rest.
    #[instrument(skip(self))]
    pub async fn pause(&self, pipeline_id: &str) -> Result<Pipeline> {
        let lock = self.lock_for(pipeline_id);
        let _guard = lock.lock().await;

        let pipeline = self.must_get(pipeline_id).await?;
        if pipeline.status != PipelineStatus::Running {
            return Err(DataflowError::InvalidTransition(format!(
                "cannot pause pipeline in state '{}'",
                pipeline.status
            )));
        }

        let mut succeeded = 0usize;
        let mut attempted = 0usize;
        for name in connector_names(&pipeline) {
            attempted += 1;
            match self.connect.pause(&name).await {
                Ok(()) => succeeded += 1,
                Err(e) => warn!("Pause of {} failed: {}", name, e),
            }
        }

        if attempted > 0 && succeeded == 0 {
            return Err(DataflowError::external(
                "kafka-connect",
                "no connector could be paused",
            ));
        }

        let event = self.event(pipeline_id, PipelineEventKind::Paused, "Pipeline paused");
        self.database
            .transition_with_resources(pipeline_id, Some(PipelineStatus::Paused), &event, &[])
            .await?;
        self.must_get(pipeline_id).await
    }

    /// Resume both connectors; symmetric to [`pause`](Self::pause).
    #[instrument(skip(self))]
    pub async fn resume(&self, pipeline_id: &str) -> Result<Pipeline> {
        let lock = self.lock_for(pipeline_id);
        let _guard = lock.lock().await;

        let pipeline = self.must_get(pipeline_id).await?;
        if pipeline.status != PipelineStatus::Paused {
            return Err(DataflowError::InvalidTransition(format!(
                "cannot resume pipeline in state '{}'",
                pipeline.status
            )));
        }

        let mut succeeded = 0usize;
        let mut attempted = 0usize;
        for name in connector_names(&pipeline) {
            attempted += 1;
            match self.connect.resume(&name).await {
                Ok(()) => succeeded += 1,
                Err(e) => warn!("Resume of {} failed: {}", name, e),
            }
        }

        if attempted > 0 && succeeded == 0 {
            return Err(DataflowError::external(
                "kafka-connect",
                "no connector could be resumed",
            ));
        }

        let event = self.event(pipeline_id, PipelineEventKind::Resumed, "Pipeline resumed");
        self.database
            .transition_with_resources(pipeline_id, Some(PipelineStatus::Running), &event, &[])
            .await?;
        self.must_get(pipeline_id).await
    }

    /// Delete both connectors and mark the pipeline stopped. Connector
    /// deletion errors are logged, not fatal.
    #[instrument(skip(self))]
    pub async fn stop(&self, pipeline_id: &str) -> Result<Pipeline> {
        let lock = self.lock_for(pipeline_id);
        let _guard = lock.lock().await;

        let pipeline = self.must_get(pipeline_id).await?;
        if !matches!(pipeline.status, PipelineStatus::Running | PipelineStatus::Paused) {
            return Err(DataflowError::InvalidTransition(format!(
                "cannot stop pipeline in state '{}'",
                pipeline.status
            )));
        }

        for name in connector_names(&pipeline) {
            match self.connect.delete(&name).await {
                Ok(()) => {
                    let _ = self.tracker.mark_deleted(pipeline_id, &name).await;
                }
                Err(e) => warn!("Connector delete during stop failed for {}: {}", name, e),
            }
        }

        self.database.set_connector_names(pipeline_id, None, None).await?;

        let event = self.event(pipeline_id, PipelineEventKind::Stopped, "Pipeline stopped");
        self.database
            .transition_with_resources(pipeline_id, Some(PipelineStatus::Stopped), &event, &[])
            .await?;
        self.must_get(pipeline_id).await
    }

    /// Ordered teardown of every tracked resource, then soft-delete.
    ///
    /// Resources that fail to delete stay in the ledger (marked failed) so
    /// the operator can retry; only a fully reclaimed pipeline is forgotten.
    #[instrument(skip(self, options))]
    pub async fn delete(&self, pipeline_id: &str, options: DeleteOptions) -> Result<DeleteReport> {
        let lock = self.lock_for(pipeline_id);
        let _guard = lock.lock().await;

        let pipeline = self.must_get(pipeline_id).await?;

        if self.tracker.resources(pipeline_id).is_empty() {
            self.tracker.hydrate(pipeline_id).await?;
        }

        let ordered = self.tracker.deletion_order(pipeline_id);
        info!(
            "Tearing down {} resources for pipeline {}",
            ordered.len(),
            pipeline_id
        );

        let mut outcomes = Vec::with_capacity(ordered.len());
        let mut cleaned = 0usize;
        let mut failed = 0usize;
        let mut skipped = 0usize;
        let mut daily_savings = 0.0f64;

        for resource in &ordered {
            let outcome = self.teardown_resource(&pipeline, resource, &options).await;
            match (outcome.success, outcome.skipped) {
                (true, false) => {
                    cleaned += 1;
                    daily_savings += self.daily_rate(resource.kind);
                    self.tracker
                        .mark_deleted(pipeline_id, &resource.resource_id)
                        .await?;
                }
                (_, true) => skipped += 1,
                (false, _) => {
                    failed += 1;
                    self.tracker
                        .mark_failed(
                            pipeline_id,
                            &resource.resource_id,
                            outcome.error.clone().unwrap_or_default(),
                        )
                        .await?;
                }
            }
            outcomes.push(outcome);
        }

        let event = self.event(
            pipeline_id,
            PipelineEventKind::Stopped,
            &format!("Pipeline deleted ({cleaned} resources reclaimed, {failed} failed)"),
        );
        self.database
            .transition_with_resources(pipeline_id, Some(PipelineStatus::Deleted), &event, &[])
            .await?;

        if failed == 0 {
            self.tracker.forget(pipeline_id).await?;
        } else {
            warn!(
                "Pipeline {} deleted with {} unreclaimed resources; ledger kept for retry",
                pipeline_id, failed
            );
        }
        self.locks.remove(pipeline_id);

        Ok(DeleteReport {
            pipeline_id: pipeline_id.to_string(),
            success: failed == 0,
            cleaned,
            failed,
            skipped,
            outcomes,
            daily_savings,
            monthly_savings: daily_savings * 30.0,
            yearly_savings: daily_savings * 365.0,
        })
    }

    async fn teardown_resource(
        &self,
        pipeline: &Pipeline,
        resource: &TrackedResource,
        options: &DeleteOptions,
    ) -> CleanupOutcome {
        let mut outcome = CleanupOutcome {
            resource_id: resource.resource_id.clone(),
            kind: resource.kind,
            success: false,
            skipped: false,
            error: None,
        };

        let result: Result<()> = match resource.kind {
            ResourceKind::SinkConnector | ResourceKind::SourceConnector => {
                self.connect.delete(&resource.resource_id).await
            }
            ResourceKind::KsqldbStream => {
                // Terminate the persistent query first when we know it.
                if let Some(query_id) =
                    resource.metadata.get("query_id").and_then(|v| v.as_str())
                {
                    if let Err(e) = self.processor.terminate_query(query_id).await {
                        warn!("Terminate query {} failed: {}", query_id, e);
                    }
                }
                self.processor.drop_stream(&resource.resource_id, false).await
            }
            ResourceKind::KsqldbTable => self.processor.drop_table(&resource.resource_id, false).await,
            ResourceKind::KafkaTopic => self.topics.delete_topic(&resource.resource_id).await,
            ResourceKind::ClickhouseTable => {
                if options.delete_destination_data {
                    let database = resource
                        .metadata
                        .get("database")
                        .and_then(|v| v.as_str())
                        .unwrap_or(&self.clickhouse.database)
                        .to_string();
                    self.clickhouse.drop_table(&database, &resource.resource_id).await
                } else {
                    outcome.skipped = true;
                    outcome.success = true;
                    return outcome;
                }
            }
            ResourceKind::ClickhouseDatabase => {
                if options.delete_destination_data {
                    self.clickhouse
                        .execute(&format!("DROP DATABASE IF EXISTS {}", resource.resource_id))
                        .await
                        .map(|_| ())
                } else {
                    outcome.skipped = true;
                    outcome.success = true;
                    return outcome;
                }
            }
            ResourceKind::AlertRule => self
                .database
                .delete_alert_rule(&pipeline.user_id, &resource.resource_id)
                .await
                .map(|_| ()),
            ResourceKind::DebeziumSlot => self.drop_replication_slot(pipeline, &resource.resource_id).await,
            ResourceKind::DebeziumPublication => {
                self.drop_publication(pipeline, &resource.resource_id).await
            }
        };

        match result {
            Ok(()) => {
                outcome.success = true;
                info!("Reclaimed {}: {}", resource.kind.as_str(), resource.resource_id);
            }
            Err(e) => {
                outcome.error = Some(e.to_string());
                error!(
                    "Failed to reclaim {} {}: {}",
                    resource.kind.as_str(),
                    resource.resource_id,
                    e
                );
            }
        }
        outcome
    }

    async fn drop_replication_slot(&self, pipeline: &Pipeline, slot: &str) -> Result<()> {
        let secret = self
            .vault
            .open(&pipeline.user_id, &pipeline.source_credential_id)
            .await?;
        let mut conn = connect_source(&secret).await?;
        sqlx::query(
            "SELECT pg_drop_replication_slot(slot_name) FROM pg_replication_slots WHERE slot_name = $1",
        )
        .bind(slot)
        .execute(&mut conn)
        .await
        .map_err(|e| DataflowError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    async fn drop_publication(&self, pipeline: &Pipeline, publication: &str) -> Result<()> {
        let secret = self
            .vault
            .open(&pipeline.user_id, &pipeline.source_credential_id)
            .await?;
        let mut conn = connect_source(&secret).await?;
        // Publication names come from our own deterministic naming.
        sqlx::query(&format!("DROP PUBLICATION IF EXISTS {publication}"))
            .execute(&mut conn)
            .await
            .map_err(|e| DataflowError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    fn daily_rate(&self, kind: ResourceKind) -> f64 {
        let rates = &self.pricing.daily_rates;
        match kind {
            ResourceKind::SourceConnector => rates.source_connector,
            ResourceKind::SinkConnector => rates.sink_connector,
            ResourceKind::KsqldbStream => rates.ksqldb_stream,
            ResourceKind::KsqldbTable => rates.ksqldb_table,
            ResourceKind::KafkaTopic => rates.kafka_topic,
            ResourceKind::ClickhouseTable => rates.clickhouse_table,
            _ => 0.0,
        }
    }

    async fn must_get(&self, pipeline_id: &str) -> Result<Pipeline> {
        self.database
            .get_pipeline(pipeline_id)
            .await?
            .ok_or_else(|| DataflowError::NotFound(format!("pipeline {pipeline_id}")))
    }

    fn event(&self, pipeline_id: &str, kind: PipelineEventKind, message: &str) -> PipelineEvent {
        PipelineEvent {
            id: Uuid::new_v4().to_string(),
            pipeline_id: pipeline_id.to_string(),
            kind,
            message: message.to_string(),
            details: None,
            created_at: Utc::now(),
        }
    }

    async fn journal(
        &self,
        pipeline_id: &str,
        kind: PipelineEventKind,
        message: &str,
        details: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut event = self.event(pipeline_id, kind, message);
        event.details = details;
        self.database
            .transition_with_resources(pipeline_id, None, &event, &[])
            .await
    }

    /// Check the per-pipeline preview path: verify a sink table matches the
    /// discovered source schema. The table name is derived exactly as
    /// provisioning derives it, filtered topic included.
    pub async fn verify_sink_table(
        &self,
        pipeline_id: &str,
        table: &str,
    ) -> Result<crate::infra::clickhouse::VerifyResult> {
        let pipeline = self.must_get(pipeline_id).await?;
        let discovered = self
            .discovery
            .cached(&pipeline.user_id, &pipeline.source_credential_id)
            .await?;
        let columns = discovered
            .iter()
            .find(|t| t.qualified_name() == table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| DataflowError::NotFound(format!("discovered table {table}")))?;

        let sink_table = sanitize(&sink_topic_for_table(&pipeline, table));
        self.clickhouse.verify(&sink_table, &columns).await
    }
}

/// Deterministic external-resource names for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub topic_prefix: String,
    pub source_connector: String,
    pub sink_connector: String,
    pub slot: String,
    pub publication: String,
    pub short_id: String,
}

impl ResourceNames {
    /// Derive all names from the hex pipeline id (id with separators
    /// stripped). Truncations keep connector and slot names within the
    /// limits of Connect and PostgreSQL.
    pub fn for_unique_id(uid: &str) -> Self {
        let twelve = &uid[..uid.len().min(12)];
        let sixteen = &uid[..uid.len().min(16)];
        let eight = &uid[..uid.len().min(8)];
        Self {
            topic_prefix: format!("dataflow_{uid}"),
            source_connector: format!("dataflow-pg-{twelve}"),
            sink_connector: format!("dataflow-clickhouse-{twelve}"),
            slot: format!("dataflow_{sixteen}"),
            publication: format!("dataflow_{sixteen}_pub"),
            short_id: eight.to_string(),
        }
    }

    pub fn for_pipeline(pipeline: &Pipeline) -> Self {
        Self::for_unique_id(&pipeline.unique_id())
    }
}

fn connector_names(pipeline: &Pipeline) -> Vec<String> {
    [
        pipeline.source_connector_name.clone(),
        pipeline.sink_connector_name.clone(),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// The pipeline's filter predicate, when one was configured.
fn filter_predicate(pipeline: &Pipeline) -> Option<&str> {
    pipeline
        .filter_config
        .as_ref()
        .and_then(|f| f.get("sql_where"))
        .and_then(|v| v.as_str())
}

/// The sink-destined topic for one source table: the filtered derived topic
/// when the pipeline carries a predicate, the raw CDC topic otherwise.
/// Provisioning and verification both derive sink-table names from this, so
/// they cannot drift apart.
pub fn sink_topic_for_table(pipeline: &Pipeline, table: &str) -> String {
    if filter_predicate(pipeline).is_some() {
        format!("{}_filtered_{}", pipeline.topic_prefix(), sanitize(table))
    } else {
        pipeline.topic_for_table(table)
    }
}

/// `public.orders` → `public_orders`; dots are not valid in sink table or
/// stream identifiers.
pub fn sanitize(name: &str) -> String {
    name.replace('.', "_")
}

/// Map a source column type to the processor's SQL type for stream DDL.
pub fn processor_type(source_type: &str) -> String {
    let t = source_type.to_lowercase();
    if t.contains("bigint") || t.contains("int8") {
        "BIGINT".to_string()
    } else if t.contains("smallint") || t.contains("int2") {
        "INT".to_string()
    } else if t.contains("int") || t.contains("serial") {
        "INTEGER".to_string()
    } else if t.contains("bool") {
        "BOOLEAN".to_string()
    } else if t.contains("double") || t.contains("float8") || t.contains("numeric") || t.contains("decimal") {
        "DOUBLE".to_string()
    } else if t.contains("real") || t.contains("float4") {
        "DOUBLE".to_string()
    } else {
        "VARCHAR".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_names() {
        let uid = "7f3c2a109b1e4f6d8a2b0c1d2e3f4a5b";
        let names = ResourceNames::for_unique_id(uid);
        assert_eq!(names.topic_prefix, format!("dataflow_{uid}"));
        assert_eq!(names.source_connector, "dataflow-pg-7f3c2a109b1e");
        assert_eq!(names.sink_connector, "dataflow-clickhouse-7f3c2a109b1e");
        assert_eq!(names.slot, "dataflow_7f3c2a109b1e4f6d");
        assert_eq!(names.publication, "dataflow_7f3c2a109b1e4f6d_pub");
        assert_eq!(names.short_id, "7f3c2a10");

        // Recovery depends on the same input producing the same names.
        assert_eq!(names, ResourceNames::for_unique_id(uid));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("public.orders"), "public_orders");
        assert_eq!(
            sanitize("dataflow_abc.public.orders"),
            "dataflow_abc_public_orders"
        );
    }

    #[test]
    fn test_processor_type_mapping() {
        assert_eq!(processor_type("bigint"), "BIGINT");
        assert_eq!(processor_type("integer"), "INTEGER");
        assert_eq!(processor_type("boolean"), "BOOLEAN");
        assert_eq!(processor_type("character varying"), "VARCHAR");
        assert_eq!(processor_type("timestamp with time zone"), "VARCHAR");
    }

    fn sample_pipeline(filter_config: Option<serde_json::Value>) -> Pipeline {
        let now = Utc::now();
        Pipeline {
            id: "7f3c2a10-9b1e-4f6d-8a2b-0c1d2e3f4a5b".to_string(),
            user_id: "u1".to_string(),
            name: "orders sync".to_string(),
            description: None,
            source_credential_id: "c1".to_string(),
            source_tables: vec!["public.orders".to_string()],
            source_connector_name: None,
            sink_kind: "clickhouse".to_string(),
            sink_config: serde_json::json!({}),
            sink_connector_name: None,
            template_id: None,
            filter_config,
            status: PipelineStatus::Pending,
            last_health_check: None,
            error_message: None,
            metrics_cache: None,
            metrics_updated_at: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            stopped_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_sink_topic_without_filter_is_raw_cdc_topic() {
        let pipeline = sample_pipeline(None);
        assert_eq!(
            sink_topic_for_table(&pipeline, "public.orders"),
            "dataflow_7f3c2a109b1e4f6d8a2b0c1d2e3f4a5b.public.orders"
        );
    }

    #[test]
    fn test_sink_topic_with_filter_is_filtered_topic() {
        let pipeline = sample_pipeline(Some(serde_json::json!({
            "column": "event_type",
            "operator": "IN",
            "sql_where": "event_type IN ('login', 'logout')",
        })));
        assert_eq!(
            sink_topic_for_table(&pipeline, "public.orders"),
            "dataflow_7f3c2a109b1e4f6d8a2b0c1d2e3f4a5b_filtered_public_orders"
        );
    }

    #[test]
    fn test_verify_side_sink_table_names() {
        // provision_sink names the sink table sanitize(sink topic). The
        // verify path derives through the same helper, so these literals
        // pin the tables it must query for both pipeline shapes - a
        // filtered pipeline verifies the _filtered_ table, never the raw
        // CDC one.
        let table = "public.orders";

        let unfiltered = sample_pipeline(None);
        assert_eq!(
            sanitize(&sink_topic_for_table(&unfiltered, table)),
            "dataflow_7f3c2a109b1e4f6d8a2b0c1d2e3f4a5b_public_orders"
        );

        let filtered = sample_pipeline(Some(serde_json::json!({
            "sql_where": "event_type IN ('login')",
        })));
        assert_eq!(
            sanitize(&sink_topic_for_table(&filtered, table)),
            "dataflow_7f3c2a109b1e4f6d8a2b0c1d2e3f4a5b_filtered_public_orders"
        );
    }
}
