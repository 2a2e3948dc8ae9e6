//! Metadata-store access layer
//!
//! Connection pooling and entity queries for the control-plane state:
//! credentials, discovered schemas, pipelines and their event journal,
//! enrichments, alert rules/history, transform templates, and the durable
//! half of the resource tracker.
//!
//! All pipeline-aggregate writes for a single orchestration step go through
//! [`Database::transition_with_resources`], which commits the pipeline row,
//! the journal event, and any tracked-resource rows in one transaction.

use crate::errors::{DataflowError, Result};
use crate::models::{
    AlertHistory, AlertRule, AnomalySeverity, ColumnInfo, Credential, DiscoveredTable, Enrichment,
    EnrichmentStatus, ForeignKey, JoinKey, JoinType, LookupTable, Pipeline, PipelineEvent,
    PipelineEventKind, PipelineStatus, ResourceKind, ResourceStatus, RuleKind, TrackedResource,
    TransformTemplate,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{info, instrument};

pub mod schema;

use crate::common::config::MetadataConfig;

/// Database client with connection pooling
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database client with connection pool
    #[instrument(skip(config))]
    pub async fn new(config: &MetadataConfig) -> Result<Self> {
        info!("Initializing metadata store connection pool");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(&config.connection_string())
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        info!("Metadata store connection pool initialized");
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the control-plane schema.
    pub async fn init_schema(&self) -> Result<()> {
        for stmt in schema::SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        info!("Metadata schema initialized ({} statements)", schema::SCHEMA.len());
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ========== Credentials ==========

    pub async fn insert_credential(&self, cred: &Credential) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credentials
                (id, user_id, name, source_kind, ciphertext, iv, tag,
                 host, port, database, is_valid, last_validated_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&cred.id)
        .bind(&cred.user_id)
        .bind(&cred.name)
        .bind(&cred.source_kind)
        .bind(&cred.ciphertext)
        .bind(&cred.iv)
        .bind(&cred.tag)
        .bind(&cred.host)
        .bind(cred.port)
        .bind(&cred.database)
        .bind(cred.is_valid)
        .bind(cred.last_validated_at)
        .bind(cred.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_credential(&self, user_id: &str, id: &str) -> Result<Option<Credential>> {
        let row = sqlx::query("SELECT * FROM credentials WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_credential(&r)).transpose()
    }

    pub async fn list_credentials(&self, user_id: &str) -> Result<Vec<Credential>> {
        let rows = sqlx::query(
            "SELECT * FROM credentials WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_credential).collect()
    }

    pub async fn delete_credential(&self, user_id: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM credentials WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========== Discovered tables ==========

    /// Upsert on (credential, schema, table); re-discovery refreshes the row.
    pub async fn upsert_discovered_table(&self, table: &DiscoveredTable) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO discovered_tables
                (id, credential_id, user_id, schema_name, table_name, columns,
                 primary_keys, foreign_keys, row_count_estimate, table_size_bytes,
                 has_primary_key, cdc_eligible, cdc_issues, replica_identity, discovered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (credential_id, schema_name, table_name) DO UPDATE SET
                columns = EXCLUDED.columns,
                primary_keys = EXCLUDED.primary_keys,
                foreign_keys = EXCLUDED.foreign_keys,
                row_count_estimate = EXCLUDED.row_count_estimate,
                table_size_bytes = EXCLUDED.table_size_bytes,
                has_primary_key = EXCLUDED.has_primary_key,
                cdc_eligible = EXCLUDED.cdc_eligible,
                cdc_issues = EXCLUDED.cdc_issues,
                replica_identity = EXCLUDED.replica_identity,
                updated_at = NOW()
            "#,
        )
        .bind(&table.id)
        .bind(&table.credential_id)
        .bind(&table.user_id)
        .bind(&table.schema_name)
        .bind(&table.table_name)
        .bind(serde_json::to_value(&table.columns)?)
        .bind(serde_json::to_value(&table.primary_keys)?)
        .bind(serde_json::to_value(&table.foreign_keys)?)
        .bind(table.row_count_estimate)
        .bind(table.table_size_bytes)
        .bind(table.has_primary_key)
        .bind(table.cdc_eligible)
        .bind(serde_json::to_value(&table.cdc_issues)?)
        .bind(&table.replica_identity)
        .bind(table.discovered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_discovered_tables(
        &self,
        user_id: &str,
        credential_id: &str,
    ) -> Result<Vec<DiscoveredTable>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM discovered_tables
            WHERE credential_id = $1 AND user_id = $2
            ORDER BY schema_name, table_name
            "#,
        )
        .bind(credential_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_discovered_table).collect()
    }

    // ========== Pipelines ==========

    pub async fn insert_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipelines
                (id, user_id, name, description, source_credential_id, source_tables,
                 source_connector_name, sink_kind, sink_config, sink_connector_name,
                 template_id, filter_config, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(&pipeline.id)
        .bind(&pipeline.user_id)
        .bind(&pipeline.name)
        .bind(&pipeline.description)
        .bind(&pipeline.source_credential_id)
        .bind(serde_json::to_value(&pipeline.source_tables)?)
        .bind(&pipeline.source_connector_name)
        .bind(&pipeline.sink_kind)
        .bind(&pipeline.sink_config)
        .bind(&pipeline.sink_connector_name)
        .bind(&pipeline.template_id)
        .bind(&pipeline.filter_config)
        .bind(pipeline.status.as_str())
        .bind(pipeline.created_at)
        .bind(pipeline.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_pipeline(&self, id: &str) -> Result<Option<Pipeline>> {
        let row = sqlx::query("SELECT * FROM pipelines WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_pipeline(&r)).transpose()
    }

    pub async fn list_pipelines(&self, user_id: &str) -> Result<Vec<Pipeline>> {
        let rows = sqlx::query(
            "SELECT * FROM pipelines WHERE user_id = $1 AND deleted_at IS NULL ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_pipeline).collect()
    }

    pub async fn list_pipelines_with_status(&self, status: PipelineStatus) -> Result<Vec<Pipeline>> {
        let rows = sqlx::query(
            "SELECT * FROM pipelines WHERE status = $1 AND deleted_at IS NULL",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_pipeline).collect()
    }

    /// Topic prefixes of all non-deleted pipelines (orphan-sweep input).
    pub async fn active_topic_prefixes(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM pipelines WHERE deleted_at IS NULL")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| {
                let id: String = r.get("id");
                format!("dataflow_{}", id.replace('-', ""))
            })
            .collect())
    }

    pub async fn set_connector_names(
        &self,
        pipeline_id: &str,
        source: Option<&str>,
        sink: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE pipelines
            SET source_connector_name = $2, sink_connector_name = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(pipeline_id)
        .bind(source)
        .bind(sink)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_health(
        &self,
        pipeline_id: &str,
        metrics: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE pipelines
            SET last_health_check = NOW(), metrics_cache = $2, metrics_updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(pipeline_id)
        .bind(metrics)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Commit one orchestration step: status change, exactly one journal
    /// event, and any tracked-resource rows, atomically.
    pub async fn transition_with_resources(
        &self,
        pipeline_id: &str,
        new_status: Option<PipelineStatus>,
        event: &PipelineEvent,
        resources: &[TrackedResource],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if let Some(status) = new_status {
            let (started, stopped, deleted) = match status {
                PipelineStatus::Running => (true, false, false),
                PipelineStatus::Stopped => (false, true, false),
                PipelineStatus::Deleted => (false, false, true),
                _ => (false, false, false),
            };

            let mut sql = String::from("UPDATE pipelines SET status = $2, updated_at = NOW()");
            if started {
                sql.push_str(", started_at = NOW(), error_message = NULL");
            }
            if stopped {
                sql.push_str(", stopped_at = NOW()");
            }
            if deleted {
                sql.push_str(
                    ", deleted_at = NOW(), source_connector_name = NULL, sink_connector_name = NULL",
                );
            }
            sql.push_str(" WHERE id = $1");

            sqlx::query(&sql)
                .bind(pipeline_id)
                .bind(status.as_str())
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO pipeline_events (id, pipeline_id, event_kind, message, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&event.id)
        .bind(pipeline_id)
        .bind(event.kind.as_str())
        .bind(&event.message)
        .bind(&event.details)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await?;

        for resource in resources {
            upsert_resource(&mut tx, resource).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Record a failure: status `failed` with the error message, plus event.
    pub async fn record_failure(
        &self,
        pipeline_id: &str,
        error: &str,
        event: &PipelineEvent,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE pipelines SET status = 'failed', error_message = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(pipeline_id)
        .bind(error)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO pipeline_events (id, pipeline_id, event_kind, message, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&event.id)
        .bind(pipeline_id)
        .bind(event.kind.as_str())
        .bind(&event.message)
        .bind(&event.details)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_pipeline_events(
        &self,
        pipeline_id: &str,
        limit: i64,
    ) -> Result<Vec<PipelineEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM pipeline_events
            WHERE pipeline_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(pipeline_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_event).collect()
    }

    // ========== Tracked resources (durable half of the tracker) ==========

    pub async fn save_resource(&self, resource: &TrackedResource) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_resource(&mut tx, resource).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_resources(&self, pipeline_id: &str) -> Result<Vec<TrackedResource>> {
        let rows = sqlx::query("SELECT * FROM tracked_resources WHERE pipeline_id = $1")
            .bind(pipeline_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_resource).collect()
    }

    /// Drop the ledger rows once a pipeline is fully reclaimed.
    pub async fn clear_resources(&self, pipeline_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM tracked_resources WHERE pipeline_id = $1")
            .bind(pipeline_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========== Enrichments ==========

    pub async fn insert_enrichment(&self, e: &Enrichment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO enrichments
                (id, pipeline_id, user_id, name, description, source_stream_name,
                 source_topic, lookup_tables, join_type, join_keys, output_columns,
                 output_stream_name, output_topic, processor_query_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(&e.id)
        .bind(&e.pipeline_id)
        .bind(&e.user_id)
        .bind(&e.name)
        .bind(&e.description)
        .bind(&e.source_stream_name)
        .bind(&e.source_topic)
        .bind(serde_json::to_value(&e.lookup_tables)?)
        .bind(e.join_type.as_str())
        .bind(serde_json::to_value(&e.join_keys)?)
        .bind(serde_json::to_value(&e.output_columns)?)
        .bind(&e.output_stream_name)
        .bind(&e.output_topic)
        .bind(&e.processor_query_id)
        .bind(e.status.as_str())
        .bind(e.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_enrichment(&self, id: &str) -> Result<Option<Enrichment>> {
        let row = sqlx::query("SELECT * FROM enrichments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_enrichment(&r)).transpose()
    }

    pub async fn list_enrichments(&self, pipeline_id: &str) -> Result<Vec<Enrichment>> {
        let rows = sqlx::query(
            "SELECT * FROM enrichments WHERE pipeline_id = $1 ORDER BY created_at",
        )
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_enrichment).collect()
    }

    pub async fn update_enrichment_status(
        &self,
        id: &str,
        status: EnrichmentStatus,
        query_id: Option<&str>,
    ) -> Result<()> {
        let activated = status == EnrichmentStatus::Active;
        let mut sql = String::from(
            "UPDATE enrichments SET status = $2, processor_query_id = COALESCE($3, processor_query_id), updated_at = NOW()",
        );
        if activated {
            sql.push_str(", activated_at = NOW()");
        }
        sql.push_str(" WHERE id = $1");

        sqlx::query(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(query_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_enrichment(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM enrichments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========== Alert rules & history ==========

    pub async fn insert_alert_rule(&self, rule: &AlertRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_rules
                (id, user_id, pipeline_id, name, description, rule_kind, threshold_config,
                 enabled_days, enabled_hours, cooldown_minutes, severity, recipients,
                 is_active, last_triggered_at, trigger_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.user_id)
        .bind(&rule.pipeline_id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.rule_kind.as_str())
        .bind(&rule.threshold_config)
        .bind(serde_json::to_value(&rule.enabled_days)?)
        .bind(rule.enabled_hours.as_ref().map(serde_json::to_value).transpose()?)
        .bind(rule.cooldown_minutes)
        .bind(rule.severity.as_str())
        .bind(serde_json::to_value(&rule.recipients)?)
        .bind(rule.is_active)
        .bind(rule.last_triggered_at)
        .bind(rule.trigger_count)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_alert_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        let row = sqlx::query("SELECT * FROM alert_rules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_rule(&r)).transpose()
    }

    pub async fn list_alert_rules(
        &self,
        user_id: &str,
        pipeline_id: Option<&str>,
        active_only: bool,
    ) -> Result<Vec<AlertRule>> {
        let rows = match pipeline_id {
            Some(pid) => {
                sqlx::query(
                    r#"
                    SELECT * FROM alert_rules
                    WHERE user_id = $1 AND pipeline_id = $2 AND (NOT $3 OR is_active)
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(user_id)
                .bind(pid)
                .bind(active_only)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM alert_rules
                    WHERE user_id = $1 AND (NOT $2 OR is_active)
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(user_id)
                .bind(active_only)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_rule).collect()
    }

    /// Active rules relevant to one pipeline: pipeline-scoped rules, else the
    /// user's pipeline-agnostic rules.
    pub async fn rules_for_pipeline(
        &self,
        pipeline_id: &str,
        user_id: &str,
    ) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query(
            "SELECT * FROM alert_rules WHERE pipeline_id = $1 AND is_active",
        )
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?;

        if !rows.is_empty() {
            return rows.iter().map(row_to_rule).collect();
        }

        let rows = sqlx::query(
            "SELECT * FROM alert_rules WHERE user_id = $1 AND pipeline_id IS NULL AND is_active",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_rule).collect()
    }

    pub async fn update_alert_rule(&self, rule: &AlertRule) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE alert_rules SET
                name = $2, description = $3, threshold_config = $4, enabled_days = $5,
                enabled_hours = $6, cooldown_minutes = $7, severity = $8, recipients = $9,
                is_active = $10, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(&rule.threshold_config)
        .bind(serde_json::to_value(&rule.enabled_days)?)
        .bind(rule.enabled_hours.as_ref().map(serde_json::to_value).transpose()?)
        .bind(rule.cooldown_minutes)
        .bind(rule.severity.as_str())
        .bind(serde_json::to_value(&rule.recipients)?)
        .bind(rule.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_alert_rule(&self, user_id: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a fired alert: history row + trigger bookkeeping, atomically.
    pub async fn record_alert(&self, history: &AlertHistory) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO alert_history
                (id, rule_id, alert_kind, severity, title, body, details,
                 email_sent, email_sent_at, email_recipients, email_error, triggered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&history.id)
        .bind(&history.rule_id)
        .bind(&history.alert_kind)
        .bind(history.severity.as_str())
        .bind(&history.title)
        .bind(&history.body)
        .bind(&history.details)
        .bind(history.email_sent)
        .bind(history.email_sent_at)
        .bind(serde_json::to_value(&history.email_recipients)?)
        .bind(&history.email_error)
        .bind(history.triggered_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE alert_rules
            SET last_triggered_at = $2, trigger_count = trigger_count + 1, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&history.rule_id)
        .bind(history.triggered_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_alert_history(
        &self,
        user_id: &str,
        rule_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AlertHistory>> {
        let rows = match rule_id {
            Some(rid) => {
                sqlx::query(
                    r#"
                    SELECT h.* FROM alert_history h
                    JOIN alert_rules r ON r.id = h.rule_id
                    WHERE r.user_id = $1 AND h.rule_id = $2
                    ORDER BY h.triggered_at DESC
                    LIMIT $3
                    "#,
                )
                .bind(user_id)
                .bind(rid)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT h.* FROM alert_history h
                    JOIN alert_rules r ON r.id = h.rule_id
                    WHERE r.user_id = $1
                    ORDER BY h.triggered_at DESC
                    LIMIT $2
                    "#,
                )
                .bind(user_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_history).collect()
    }

    // ========== Transform templates ==========

    pub async fn insert_template(&self, t: &TransformTemplate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transform_templates
                (id, user_id, name, description, transforms, anomaly_config, is_default, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&t.id)
        .bind(&t.user_id)
        .bind(&t.name)
        .bind(&t.description)
        .bind(serde_json::to_value(&t.transforms)?)
        .bind(&t.anomaly_config)
        .bind(t.is_default)
        .bind(t.created_at)
        .bind(t.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_template(&self, user_id: &str, id: &str) -> Result<Option<TransformTemplate>> {
        let row = sqlx::query("SELECT * FROM transform_templates WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_template(&r)).transpose()
    }

    pub async fn list_templates(&self, user_id: &str) -> Result<Vec<TransformTemplate>> {
        let rows = sqlx::query(
            "SELECT * FROM transform_templates WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_template).collect()
    }

    pub async fn update_template(&self, t: &TransformTemplate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE transform_templates SET
                name = $3, description = $4, transforms = $5, anomaly_config = $6,
                is_default = $7, updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(&t.id)
        .bind(&t.user_id)
        .bind(&t.name)
        .bind(&t.description)
        .bind(serde_json::to_value(&t.transforms)?)
        .bind(&t.anomaly_config)
        .bind(t.is_default)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_template(&self, user_id: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM transform_templates WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn upsert_resource(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    resource: &TrackedResource,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tracked_resources
            (pipeline_id, resource_id, resource_kind, resource_name, status,
             metadata, created_at, deleted_at, error_message, depends_on)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (pipeline_id, resource_id) DO UPDATE SET
            status = EXCLUDED.status,
            metadata = EXCLUDED.metadata,
            created_at = EXCLUDED.created_at,
            deleted_at = EXCLUDED.deleted_at,
            error_message = EXCLUDED.error_message,
            depends_on = EXCLUDED.depends_on
        "#,
    )
    .bind(&resource.pipeline_id)
    .bind(&resource.resource_id)
    .bind(resource.kind.as_str())
    .bind(&resource.resource_name)
    .bind(resource.status.as_str())
    .bind(&resource.metadata)
    .bind(resource.created_at)
    .bind(resource.deleted_at)
    .bind(&resource.error_message)
    .bind(serde_json::to_value(&resource.depends_on)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ---- Row mapping ----

fn integrity(what: &str, value: &str) -> DataflowError {
    DataflowError::Integrity(format!("unexpected {what}: '{value}'"))
}

fn json_vec<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<Vec<T>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(value)?)
}

fn row_to_credential(row: &PgRow) -> Result<Credential> {
    Ok(Credential {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        source_kind: row.get("source_kind"),
        ciphertext: row.get("ciphertext"),
        iv: row.get("iv"),
        tag: row.get("tag"),
        host: row.get("host"),
        port: row.get("port"),
        database: row.get("database"),
        is_valid: row.get("is_valid"),
        last_validated_at: row.get("last_validated_at"),
        created_at: row.get("created_at"),
    })
}

fn row_to_discovered_table(row: &PgRow) -> Result<DiscoveredTable> {
    let columns: Vec<ColumnInfo> = json_vec(row.get("columns"))?;
    let primary_keys: Vec<String> = json_vec(row.get("primary_keys"))?;
    let foreign_keys: Vec<ForeignKey> = json_vec(row.get("foreign_keys"))?;
    let cdc_issues: Vec<String> = json_vec(row.get("cdc_issues"))?;
    Ok(DiscoveredTable {
        id: row.get("id"),
        credential_id: row.get("credential_id"),
        user_id: row.get("user_id"),
        schema_name: row.get("schema_name"),
        table_name: row.get("table_name"),
        columns,
        primary_keys,
        foreign_keys,
        row_count_estimate: row.get("row_count_estimate"),
        table_size_bytes: row.get("table_size_bytes"),
        has_primary_key: row.get("has_primary_key"),
        cdc_eligible: row.get("cdc_eligible"),
        cdc_issues,
        replica_identity: row.get("replica_identity"),
        discovered_at: row.get("discovered_at"),
    })
}

fn row_to_pipeline(row: &PgRow) -> Result<Pipeline> {
    let status_str: String = row.get("status");
    let status =
        PipelineStatus::parse(&status_str).ok_or_else(|| integrity("pipeline status", &status_str))?;
    let source_tables: Vec<String> = json_vec(row.get("source_tables"))?;
    Ok(Pipeline {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        description: row.get("description"),
        source_credential_id: row.get("source_credential_id"),
        source_tables,
        source_connector_name: row.get("source_connector_name"),
        sink_kind: row.get("sink_kind"),
        sink_config: row.get("sink_config"),
        sink_connector_name: row.get("sink_connector_name"),
        template_id: row.get("template_id"),
        filter_config: row.get("filter_config"),
        status,
        last_health_check: row.get("last_health_check"),
        error_message: row.get("error_message"),
        metrics_cache: row.get("metrics_cache"),
        metrics_updated_at: row.get("metrics_updated_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        started_at: row.get("started_at"),
        stopped_at: row.get("stopped_at"),
        deleted_at: row.get("deleted_at"),
    })
}

fn row_to_event(row: &PgRow) -> Result<PipelineEvent> {
    let kind_str: String = row.get("event_kind");
    let kind =
        PipelineEventKind::parse(&kind_str).ok_or_else(|| integrity("event kind", &kind_str))?;
    Ok(PipelineEvent {
        id: row.get("id"),
        pipeline_id: row.get("pipeline_id"),
        kind,
        message: row.get("message"),
        details: row.get("details"),
        created_at: row.get("created_at"),
    })
}

fn row_to_resource(row: &PgRow) -> Result<TrackedResource> {
    let kind_str: String = row.get("resource_kind");
    let kind = ResourceKind::parse(&kind_str).ok_or_else(|| integrity("resource kind", &kind_str))?;
    let status_str: String = row.get("status");
    let status =
        ResourceStatus::parse(&status_str).ok_or_else(|| integrity("resource status", &status_str))?;
    let depends_on: Vec<String> = json_vec(row.get("depends_on"))?;
    Ok(TrackedResource {
        kind,
        resource_id: row.get("resource_id"),
        resource_name: row.get("resource_name"),
        pipeline_id: row.get("pipeline_id"),
        status,
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
        deleted_at: row.get("deleted_at"),
        error_message: row.get("error_message"),
        depends_on,
    })
}

fn row_to_enrichment(row: &PgRow) -> Result<Enrichment> {
    let join_type_str: String = row.get("join_type");
    let join_type =
        JoinType::parse(&join_type_str).ok_or_else(|| integrity("join type", &join_type_str))?;
    let status_str: String = row.get("status");
    let status = EnrichmentStatus::parse(&status_str)
        .ok_or_else(|| integrity("enrichment status", &status_str))?;
    let lookup_tables: Vec<LookupTable> = json_vec(row.get("lookup_tables"))?;
    let join_keys: Vec<JoinKey> = json_vec(row.get("join_keys"))?;
    let output_columns: Vec<String> = json_vec(row.get("output_columns"))?;
    Ok(Enrichment {
        id: row.get("id"),
        pipeline_id: row.get("pipeline_id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        description: row.get("description"),
        source_stream_name: row.get("source_stream_name"),
        source_topic: row.get("source_topic"),
        lookup_tables,
        join_type,
        join_keys,
        output_columns,
        output_stream_name: row.get("output_stream_name"),
        output_topic: row.get("output_topic"),
        processor_query_id: row.get("processor_query_id"),
        status,
        created_at: row.get("created_at"),
        activated_at: row.get("activated_at"),
    })
}

fn row_to_rule(row: &PgRow) -> Result<AlertRule> {
    let kind_str: String = row.get("rule_kind");
    let rule_kind = RuleKind::parse(&kind_str).ok_or_else(|| integrity("rule kind", &kind_str))?;
    let severity_str: String = row.get("severity");
    let severity =
        AnomalySeverity::parse(&severity_str).ok_or_else(|| integrity("severity", &severity_str))?;
    let enabled_days: Vec<u8> = json_vec(row.get("enabled_days"))?;
    let enabled_hours: Option<serde_json::Value> = row.get("enabled_hours");
    let enabled_hours = match enabled_hours {
        Some(v) if !v.is_null() => Some(serde_json::from_value(v)?),
        _ => None,
    };
    let recipients: Vec<String> = json_vec(row.get("recipients"))?;
    Ok(AlertRule {
        id: row.get("id"),
        user_id: row.get("user_id"),
        pipeline_id: row.get("pipeline_id"),
        name: row.get("name"),
        description: row.get("description"),
        rule_kind,
        threshold_config: row.get("threshold_config"),
        enabled_days,
        enabled_hours,
        cooldown_minutes: row.get("cooldown_minutes"),
        severity,
        recipients,
        is_active: row.get("is_active"),
        last_triggered_at: row.get("last_triggered_at"),
        trigger_count: row.get("trigger_count"),
        created_at: row.get("created_at"),
    })
}

fn row_to_history(row: &PgRow) -> Result<AlertHistory> {
    let severity_str: String = row.get("severity");
    let severity =
        AnomalySeverity::parse(&severity_str).ok_or_else(|| integrity("severity", &severity_str))?;
    let email_recipients: Vec<String> = json_vec(row.get("email_recipients"))?;
    Ok(AlertHistory {
        id: row.get("id"),
        rule_id: row.get("rule_id"),
        alert_kind: row.get("alert_kind"),
        severity,
        title: row.get("title"),
        body: row.get("body"),
        details: row.get("details"),
        email_sent: row.get("email_sent"),
        email_sent_at: row.get("email_sent_at"),
        email_recipients,
        email_error: row.get("email_error"),
        triggered_at: row.get("triggered_at"),
    })
}

fn row_to_template(row: &PgRow) -> Result<TransformTemplate> {
    let transforms: Vec<serde_json::Value> = json_vec(row.get("transforms"))?;
    Ok(TransformTemplate {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        description: row.get("description"),
        transforms,
        anomaly_config: row.get("anomaly_config"),
        is_default: row.get("is_default"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
