//! Enrichment lifecycle
//!
//! An enrichment is a stream-table JOIN attached to a pipeline: lookup-table
//! columns are appended to each streamed event. Activation plans the join,
//! executes the processor DDL, and records the artifacts in the resource
//! tracker; deactivation terminates the persistent query and drops the
//! output stream.

use crate::database::Database;
use crate::errors::{DataflowError, Result};
use crate::models::enrichment::JoinColumn;
use crate::models::{Enrichment, EnrichmentStatus, JoinType, ResourceKind};
use crate::pipeline::orchestrator::sanitize;
use crate::pipeline::tracker::ResourceTracker;
use crate::planner::{JoinPlanner, JoinRequest};
use crate::infra::ProcessorClient;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Request to register an enrichment on a pipeline.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EnrichmentSpec {
    pub pipeline_id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source_stream_name: String,
    pub source_topic: String,
    pub lookup_tables: Vec<crate::models::LookupTable>,
    pub join_type: JoinType,
    pub join_keys: Vec<crate::models::JoinKey>,
    pub output_columns: Vec<String>,
}

/// Manages stream-table JOIN enrichments.
pub struct EnrichmentService {
    database: Arc<Database>,
    processor: Arc<ProcessorClient>,
    tracker: Arc<ResourceTracker>,
    planner: JoinPlanner,
}

impl EnrichmentService {
    pub fn new(
        database: Arc<Database>,
        processor: Arc<ProcessorClient>,
        tracker: Arc<ResourceTracker>,
    ) -> Self {
        Self {
            database,
            processor,
            tracker,
            planner: JoinPlanner::new(),
        }
    }

    /// Register an enrichment in `pending`. Static validation only; no
    /// processor contact.
    #[instrument(skip(self, spec))]
    pub async fn create(&self, spec: EnrichmentSpec) -> Result<Enrichment> {
        if spec.lookup_tables.is_empty() {
            return Err(DataflowError::Validation(
                "at least one lookup table is required".to_string(),
            ));
        }
        if spec.join_keys.is_empty() {
            return Err(DataflowError::Validation("join keys are required".to_string()));
        }

        let aliases: Vec<&str> = spec.lookup_tables.iter().map(|t| t.alias.as_str()).collect();
        for jk in &spec.join_keys {
            if !aliases.contains(&jk.table_alias.as_str()) {
                return Err(DataflowError::Validation(format!(
                    "join key references unknown table alias '{}'",
                    jk.table_alias
                )));
            }
        }
        for col in &spec.output_columns {
            if let Some((alias, _)) = col.split_once('.') {
                if alias != "s" && !aliases.contains(&alias) {
                    return Err(DataflowError::Validation(format!(
                        "Unknown alias '{alias}' in column '{col}'"
                    )));
                }
            }
        }

        let output_stream_name = format!("enriched_{}", sanitize(&spec.source_stream_name));
        let output_topic = output_stream_name.to_lowercase();

        let enrichment = Enrichment {
            id: Uuid::new_v4().to_string(),
            pipeline_id: spec.pipeline_id,
            user_id: spec.user_id,
            name: spec.name,
            description: spec.description,
            source_stream_name: spec.source_stream_name,
            source_topic: spec.source_topic,
            lookup_tables: spec.lookup_tables,
            join_type: spec.join_type,
            join_keys: spec.join_keys,
            output_columns: spec.output_columns,
            output_stream_name,
            output_topic,
            processor_query_id: None,
            status: EnrichmentStatus::Pending,
            created_at: Utc::now(),
            activated_at: None,
        };

        self.database.insert_enrichment(&enrichment).await?;
        info!("Created enrichment {} ({})", enrichment.name, enrichment.id);
        Ok(enrichment)
    }

    pub async fn get(&self, id: &str) -> Result<Enrichment> {
        self.database
            .get_enrichment(id)
            .await?
            .ok_or_else(|| DataflowError::NotFound(format!("enrichment {id}")))
    }

    pub async fn list(&self, pipeline_id: &str) -> Result<Vec<Enrichment>> {
        self.database.list_enrichments(pipeline_id).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let enrichment = self.get(id).await?;
        if enrichment.status == EnrichmentStatus::Active {
            self.deactivate(id).await?;
        }
        self.database.delete_enrichment(id).await?;
        info!("Deleted enrichment {}", id);
        Ok(())
    }

    /// Plan the join against the live stream schema, execute the DDL, and
    /// record the created artifacts.
    #[instrument(skip(self))]
    pub async fn activate(&self, id: &str) -> Result<Enrichment> {
        let mut enrichment = self.get(id).await?;
        if enrichment.status == EnrichmentStatus::Active {
            return Ok(enrichment);
        }

        let source_schema = self.stream_schema(&enrichment.source_stream_name).await?;

        // Processor-side table names derive from the pipeline so recreation
        // reuses them.
        let short_id: String = enrichment.pipeline_id.replace('-', "").chars().take(8).collect();
        for table in &mut enrichment.lookup_tables {
            if table.processor_table.is_none() {
                table.processor_table =
                    Some(format!("tbl_{}_{}", short_id, sanitize(&table.name)));
            }
        }

        let request = JoinRequest {
            source_stream: enrichment.source_stream_name.clone(),
            source_topic: enrichment.source_topic.clone(),
            source_schema,
            lookup_tables: enrichment.lookup_tables.clone(),
            join_keys: enrichment.join_keys.clone(),
            output_columns: enrichment.output_columns.clone(),
            join_type: enrichment.join_type,
            stream_key_column: None,
            value_format: "AVRO".to_string(),
            partitions: 3,
        };

        let plan = self.planner.plan(&request)?;
        for warning in &plan.validation.warnings {
            warn!("Enrichment {}: {}", id, warning);
        }

        // Lookup tables first, then the join query. The source stream
        // already exists; its DDL is skipped.
        for (table, ddl) in enrichment.lookup_tables.iter().zip(plan.table_ddls.iter()) {
            let name = table
                .processor_table
                .clone()
                .unwrap_or_else(|| table.name.clone());
            let outcome = self.processor.execute_ddl(&name, ddl).await?;
            self.tracker
                .track(
                    &enrichment.pipeline_id,
                    ResourceKind::KsqldbTable,
                    &outcome.name,
                    &format!("lookup table {}", table.name),
                    serde_json::json!({"topic": table.topic, "enrichment_id": id}),
                    vec![],
                )
                .await?;
            self.tracker
                .mark_active(&enrichment.pipeline_id, &outcome.name)
                .await?;
        }

        let join_outcome = self
            .processor
            .execute_ddl(&enrichment.output_stream_name, &plan.join_ddl)
            .await?;

        self.tracker
            .track(
                &enrichment.pipeline_id,
                ResourceKind::KsqldbStream,
                &join_outcome.name,
                &format!("enriched stream {}", enrichment.name),
                serde_json::json!({
                    "topic": enrichment.output_topic,
                    "query_id": join_outcome.query_id,
                    "enrichment_id": id,
                }),
                vec![],
            )
            .await?;
        self.tracker
            .mark_active(&enrichment.pipeline_id, &join_outcome.name)
            .await?;

        self.tracker
            .track(
                &enrichment.pipeline_id,
                ResourceKind::KafkaTopic,
                &enrichment.output_topic,
                &format!("enriched topic for {}", enrichment.name),
                serde_json::json!({"enrichment_id": id}),
                vec![join_outcome.name.clone()],
            )
            .await?;
        self.tracker
            .mark_active(&enrichment.pipeline_id, &enrichment.output_topic)
            .await?;

        self.database
            .update_enrichment_status(
                id,
                EnrichmentStatus::Active,
                join_outcome.query_id.as_deref(),
            )
            .await?;

        info!("Activated enrichment {} ({})", enrichment.name, id);
        self.get(id).await
    }

    /// Terminate the persistent query and drop the output stream.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, id: &str) -> Result<Enrichment> {
        let enrichment = self.get(id).await?;
        if enrichment.status != EnrichmentStatus::Active {
            return Ok(enrichment);
        }

        if let Some(query_id) = &enrichment.processor_query_id {
            if let Err(e) = self.processor.terminate_query(query_id).await {
                warn!("Terminate query {} failed: {}", query_id, e);
            }
        }
        self.processor
            .drop_stream(&enrichment.output_stream_name, false)
            .await?;

        let _ = self
            .tracker
            .mark_deleted(&enrichment.pipeline_id, &enrichment.output_stream_name)
            .await;

        self.database
            .update_enrichment_status(id, EnrichmentStatus::Stopped, None)
            .await?;

        info!("Deactivated enrichment {}", id);
        self.get(id).await
    }

    /// Current stream schema via DESCRIBE.
    async fn stream_schema(&self, stream: &str) -> Result<Vec<JoinColumn>> {
        let description = self.processor.describe(stream).await?;
        let fields = description
            .get("sourceDescription")
            .and_then(|d| d.get("fields"))
            .and_then(|f| f.as_array())
            .ok_or_else(|| {
                DataflowError::external(
                    "stream-processor",
                    format!("DESCRIBE {stream} returned no fields"),
                )
            })?;

        Ok(fields
            .iter()
            .filter_map(|field| {
                // The processor reports upper-cased identifiers; join keys
                // are written in source (lowercase) form.
                let name = field.get("name")?.as_str()?.to_lowercase();
                let data_type = field
                    .get("schema")
                    .and_then(|s| s.get("type"))
                    .and_then(|t| t.as_str())
                    .unwrap_or("STRING")
                    .to_string();
                Some(JoinColumn {
                    name,
                    data_type,
                    nullable: true,
                })
            })
            .collect())
    }
}
