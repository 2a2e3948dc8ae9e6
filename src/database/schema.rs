//! Metadata-store schema
//!
//! DDL for the control-plane tables. Pipelines are soft-deleted
//! (`deleted_at`); alert history is retained indefinitely; tracked-resource
//! rows are kept at least until their pipeline reaches `deleted`.

/// All control-plane tables, in dependency order.
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS credentials (
        id VARCHAR(255) PRIMARY KEY,
        user_id VARCHAR(255) NOT NULL,
        name VARCHAR(255) NOT NULL,
        source_kind VARCHAR(50) NOT NULL,
        ciphertext BYTEA NOT NULL,
        iv BYTEA NOT NULL,
        tag BYTEA NOT NULL,
        host VARCHAR(255),
        port INTEGER,
        database VARCHAR(255),
        is_valid BOOLEAN NOT NULL DEFAULT FALSE,
        last_validated_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_credentials_user ON credentials (user_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS discovered_tables (
        id VARCHAR(255) PRIMARY KEY,
        credential_id VARCHAR(255) NOT NULL REFERENCES credentials(id) ON DELETE CASCADE,
        user_id VARCHAR(255) NOT NULL,
        schema_name VARCHAR(255) NOT NULL,
        table_name VARCHAR(255) NOT NULL,
        columns JSONB NOT NULL,
        primary_keys JSONB NOT NULL,
        foreign_keys JSONB NOT NULL,
        row_count_estimate BIGINT,
        table_size_bytes BIGINT,
        has_primary_key BOOLEAN NOT NULL DEFAULT FALSE,
        cdc_eligible BOOLEAN NOT NULL DEFAULT FALSE,
        cdc_issues JSONB NOT NULL DEFAULT '[]',
        replica_identity VARCHAR(20) NOT NULL DEFAULT 'UNKNOWN',
        discovered_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT uq_discovered_table UNIQUE (credential_id, schema_name, table_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transform_templates (
        id VARCHAR(255) PRIMARY KEY,
        user_id VARCHAR(255) NOT NULL,
        name VARCHAR(255) NOT NULL,
        description TEXT,
        transforms JSONB NOT NULL,
        anomaly_config JSONB NOT NULL,
        is_default BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pipelines (
        id VARCHAR(255) PRIMARY KEY,
        user_id VARCHAR(255) NOT NULL,
        name VARCHAR(255) NOT NULL,
        description TEXT,
        source_credential_id VARCHAR(255) NOT NULL REFERENCES credentials(id),
        source_tables JSONB NOT NULL,
        source_connector_name VARCHAR(255),
        sink_kind VARCHAR(50) NOT NULL,
        sink_config JSONB NOT NULL,
        sink_connector_name VARCHAR(255),
        template_id VARCHAR(255) REFERENCES transform_templates(id) ON DELETE SET NULL,
        filter_config JSONB,
        status VARCHAR(50) NOT NULL DEFAULT 'pending',
        last_health_check TIMESTAMPTZ,
        error_message TEXT,
        metrics_cache JSONB,
        metrics_updated_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        started_at TIMESTAMPTZ,
        stopped_at TIMESTAMPTZ,
        deleted_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_pipelines_user ON pipelines (user_id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_pipelines_status ON pipelines (status) WHERE deleted_at IS NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pipeline_events (
        id VARCHAR(255) PRIMARY KEY,
        pipeline_id VARCHAR(255) NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
        event_kind VARCHAR(50) NOT NULL,
        message TEXT NOT NULL,
        details JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_pipeline_events_lookup ON pipeline_events (pipeline_id, created_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS enrichments (
        id VARCHAR(255) PRIMARY KEY,
        pipeline_id VARCHAR(255) NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
        user_id VARCHAR(255) NOT NULL,
        name VARCHAR(255) NOT NULL,
        description TEXT,
        source_stream_name VARCHAR(255) NOT NULL,
        source_topic VARCHAR(255) NOT NULL,
        lookup_tables JSONB NOT NULL,
        join_type VARCHAR(10) NOT NULL DEFAULT 'LEFT',
        join_keys JSONB NOT NULL,
        output_columns JSONB NOT NULL,
        output_stream_name VARCHAR(255) NOT NULL,
        output_topic VARCHAR(255) NOT NULL,
        processor_query_id VARCHAR(255),
        status VARCHAR(50) NOT NULL DEFAULT 'pending',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        activated_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alert_rules (
        id VARCHAR(255) PRIMARY KEY,
        user_id VARCHAR(255) NOT NULL,
        pipeline_id VARCHAR(255) REFERENCES pipelines(id) ON DELETE CASCADE,
        name VARCHAR(255) NOT NULL,
        description TEXT,
        rule_kind VARCHAR(50) NOT NULL,
        threshold_config JSONB NOT NULL,
        enabled_days JSONB NOT NULL DEFAULT '[4]',
        enabled_hours JSONB,
        cooldown_minutes BIGINT NOT NULL DEFAULT 30,
        severity VARCHAR(20) NOT NULL DEFAULT 'warning',
        recipients JSONB NOT NULL DEFAULT '[]',
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        last_triggered_at TIMESTAMPTZ,
        trigger_count BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_alert_rules_user_pipeline ON alert_rules (user_id, pipeline_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alert_history (
        id VARCHAR(255) PRIMARY KEY,
        rule_id VARCHAR(255) NOT NULL REFERENCES alert_rules(id) ON DELETE CASCADE,
        alert_kind VARCHAR(50) NOT NULL,
        severity VARCHAR(20) NOT NULL,
        title VARCHAR(500) NOT NULL,
        body TEXT NOT NULL,
        details JSONB,
        email_sent BOOLEAN NOT NULL DEFAULT FALSE,
        email_sent_at TIMESTAMPTZ,
        email_recipients JSONB NOT NULL DEFAULT '[]',
        email_error TEXT,
        triggered_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_alert_history_rule_time ON alert_history (rule_id, triggered_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tracked_resources (
        pipeline_id VARCHAR(255) NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
        resource_id VARCHAR(512) NOT NULL,
        resource_kind VARCHAR(50) NOT NULL,
        resource_name VARCHAR(512) NOT NULL,
        status VARCHAR(20) NOT NULL DEFAULT 'pending',
        metadata JSONB NOT NULL DEFAULT 'null',
        created_at TIMESTAMPTZ,
        deleted_at TIMESTAMPTZ,
        error_message TEXT,
        depends_on JSONB NOT NULL DEFAULT '[]',
        PRIMARY KEY (pipeline_id, resource_id)
    )
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_nonempty() {
        assert!(SCHEMA.len() >= 10);
        for stmt in SCHEMA {
            assert!(stmt.trim_start().starts_with("CREATE"));
        }
    }
}
