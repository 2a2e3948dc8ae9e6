//! CDC readiness probing
//!
//! Validates that a source PostgreSQL database can sustain logical
//! replication: WAL mode, replication privilege, slot and sender capacity,
//! plus per-table primary-key and replica-identity checks. Detects the
//! hosting provider so failed checks come with the right fix instructions.

use crate::errors::{DataflowError, Result};
use crate::models::SourceSecret;
use crate::modules::{ModuleRegistry, ReadinessProbe};
use crate::vault::CredentialVault;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgConnection;
use sqlx::Row;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::connect_source;

/// Hosting-provider variants with provider-specific remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    AwsRds,
    Supabase,
    CloudSql,
    AzureDatabase,
    SelfHosted,
}

impl Provider {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::AwsRds => "AWS RDS PostgreSQL",
            Self::Supabase => "Supabase PostgreSQL",
            Self::CloudSql => "Google Cloud SQL PostgreSQL",
            Self::AzureDatabase => "Azure Database for PostgreSQL",
            Self::SelfHosted => "Self-Hosted PostgreSQL",
        }
    }

    fn wal_fix(&self) -> &'static str {
        match self {
            Self::AwsRds => "Create a parameter group with rds.logical_replication = 1, attach it to the instance, and reboot",
            Self::Supabase => "Logical replication is enabled by default on Supabase",
            Self::CloudSql => "Set cloudsql.logical_decoding = on in instance flags and restart",
            Self::AzureDatabase => "Set azure.replication_support = logical in server parameters and restart",
            Self::SelfHosted => "Set wal_level = logical in postgresql.conf and restart",
        }
    }

    fn replication_fix(&self) -> &'static str {
        match self {
            Self::AwsRds | Self::Supabase => "Grant the rds_replication role: GRANT rds_replication TO your_user;",
            Self::CloudSql | Self::AzureDatabase | Self::SelfHosted => {
                "ALTER USER your_user REPLICATION;"
            }
        }
    }
}

/// One server-level check.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_instruction: Option<String>,
}

/// One per-table check.
#[derive(Debug, Clone, Serialize)]
pub struct TableCheck {
    pub table_name: String,
    pub exists: bool,
    pub has_primary_key: bool,
    pub replica_identity: String,
    pub passed: bool,
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_instruction: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    Warning,
    High,
    Info,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub title: String,
    pub description: String,
}

/// Full readiness report.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub overall_ready: bool,
    pub provider: Provider,
    pub provider_name: &'static str,
    pub server_version: String,
    pub checks: Vec<Check>,
    pub table_checks: Vec<TableCheck>,
    pub recommendations: Vec<Recommendation>,
    pub checked_at: DateTime<Utc>,
}

/// Validates PostgreSQL readiness for logical replication.
pub struct ReadinessProber {
    vault: Arc<CredentialVault>,
}

impl ReadinessProber {
    pub fn new(vault: Arc<CredentialVault>) -> Self {
        Self { vault }
    }

    /// Run the full readiness report for a stored credential.
    #[instrument(skip(self, registry))]
    pub async fn check(
        &self,
        user_id: &str,
        credential_id: &str,
        tables: &[String],
        registry: Option<&ModuleRegistry>,
    ) -> Result<ReadinessReport> {
        let secret = self.vault.open(user_id, credential_id).await?;
        let mut conn = connect_source(&secret).await?;

        let provider = detect_provider(&mut conn).await?;
        let server_version = server_version(&mut conn).await?;

        let mut checks = vec![
            check_wal_level(&mut conn, provider).await?,
            check_replication_privilege(&mut conn, provider, &secret.username).await?,
            check_replication_slots(&mut conn).await?,
            check_wal_senders(&mut conn).await?,
        ];

        // Descriptor-declared probes (generic expected-value comparisons).
        if let Some(registry) = registry {
            if let Ok(module) = registry.get_source("postgresql") {
                for probe in &module.readiness_probes {
                    if checks.iter().any(|c| c.name == probe.name) {
                        continue;
                    }
                    checks.push(run_descriptor_probe(&mut conn, probe).await);
                }
            }
        }

        let mut table_checks = Vec::with_capacity(tables.len());
        for table in tables {
            let (schema, name) = split_table(table);
            let mut check = check_table(&mut conn, &schema, &name).await?;
            check.table_name = format!("{schema}.{name}");
            table_checks.push(check);
        }

        // Critical prerequisites: WAL mode and replication privilege.
        let overall_ready = checks
            .iter()
            .take(2)
            .all(|c| c.passed);

        let recommendations = build_recommendations(&checks, provider, &table_checks);

        info!(
            "CDC readiness for credential {}: {}",
            credential_id,
            if overall_ready { "READY" } else { "NOT READY" }
        );

        Ok(ReadinessReport {
            overall_ready,
            provider,
            provider_name: provider.display_name(),
            server_version,
            checks,
            table_checks,
            recommendations,
            checked_at: Utc::now(),
        })
    }
}

fn split_table(qualified: &str) -> (String, String) {
    match qualified.split_once('.') {
        Some((schema, table)) => (schema.to_string(), table.to_string()),
        None => ("public".to_string(), qualified.to_string()),
    }
}

async fn detect_provider(conn: &mut PgConnection) -> Result<Provider> {
    let version_string: String = sqlx::query_scalar("SELECT version()").fetch_one(&mut *conn).await?;
    let version_lower = version_string.to_lowercase();

    let rds: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pg_settings WHERE name LIKE 'rds.%'")
            .fetch_one(&mut *conn)
            .await?;
    let cloudsql: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pg_settings WHERE name LIKE 'cloudsql.%'")
            .fetch_one(&mut *conn)
            .await?;
    let azure: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pg_settings WHERE name LIKE 'azure.%'")
            .fetch_one(&mut *conn)
            .await?;

    Ok(if rds > 0 {
        if version_lower.contains("supabase") {
            Provider::Supabase
        } else {
            Provider::AwsRds
        }
    } else if version_lower.contains("supabase") {
        Provider::Supabase
    } else if cloudsql > 0 {
        Provider::CloudSql
    } else if azure > 0 {
        Provider::AzureDatabase
    } else {
        Provider::SelfHosted
    })
}

async fn server_version(conn: &mut PgConnection) -> Result<String> {
    Ok(sqlx::query_scalar("SHOW server_version").fetch_one(conn).await?)
}

async fn check_wal_level(conn: &mut PgConnection, provider: Provider) -> Result<Check> {
    let wal_level: String = sqlx::query_scalar("SHOW wal_level").fetch_one(conn).await?;
    let passed = wal_level == "logical";
    Ok(Check {
        name: "WAL Level".to_string(),
        passed,
        expected: Some("logical".to_string()),
        actual: Some(wal_level.clone()),
        message: if passed {
            format!("WAL level is '{wal_level}'")
        } else {
            format!("WAL level is '{wal_level}' - needs to be 'logical'")
        },
        fix_instruction: (!passed).then(|| provider.wal_fix().to_string()),
    })
}

async fn check_replication_privilege(
    conn: &mut PgConnection,
    provider: Provider,
    username: &str,
) -> Result<Check> {
    let has_privilege: Option<bool> =
        sqlx::query_scalar("SELECT rolreplication FROM pg_roles WHERE rolname = $1")
            .bind(username)
            .fetch_optional(conn)
            .await?;
    let passed = has_privilege.unwrap_or(false);
    Ok(Check {
        name: "Replication Privilege".to_string(),
        passed,
        expected: Some("true".to_string()),
        actual: Some(passed.to_string()),
        message: format!(
            "User '{}' {} replication privilege",
            username,
            if passed { "has" } else { "does not have" }
        ),
        fix_instruction: (!passed).then(|| provider.replication_fix().to_string()),
    })
}

async fn check_replication_slots(conn: &mut PgConnection) -> Result<Check> {
    let max_slots: String = sqlx::query_scalar("SHOW max_replication_slots").fetch_one(&mut *conn).await?;
    let max_slots: i64 = max_slots.parse().unwrap_or(0);
    let used_slots: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pg_replication_slots")
        .fetch_one(&mut *conn)
        .await?;
    let available = max_slots - used_slots;
    let passed = available > 0;
    Ok(Check {
        name: "Replication Slots".to_string(),
        passed,
        expected: Some("> 0 available".to_string()),
        actual: Some(format!("{available} of {max_slots} available")),
        message: format!("{available} replication slots available (out of {max_slots})"),
        fix_instruction: (!passed).then(|| {
            "Increase max_replication_slots in PostgreSQL configuration or remove unused replication slots".to_string()
        }),
    })
}

async fn check_wal_senders(conn: &mut PgConnection) -> Result<Check> {
    let max_senders: String = sqlx::query_scalar("SHOW max_wal_senders").fetch_one(&mut *conn).await?;
    let max_senders: i64 = max_senders.parse().unwrap_or(0);
    let active: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pg_stat_replication")
        .fetch_one(&mut *conn)
        .await?;
    let available = max_senders - active;
    let passed = available > 0;
    Ok(Check {
        name: "WAL Senders".to_string(),
        passed,
        expected: Some("> 0 available".to_string()),
        actual: Some(format!("{available} of {max_senders} available")),
        message: format!("{available} WAL senders available (out of {max_senders})"),
        fix_instruction: (!passed)
            .then(|| "Increase max_wal_senders in PostgreSQL configuration".to_string()),
    })
}

/// Run a descriptor-declared probe: first column of the first row compared
/// against the expected value, case-insensitively. Probe failures surface in
/// the result, not as errors.
async fn run_descriptor_probe(conn: &mut PgConnection, probe: &ReadinessProbe) -> Check {
    let expected = probe
        .expected
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| probe.expected.to_string());

    match scalar_text(conn, &probe.query).await {
        Ok(actual) => {
            let passed = actual.to_lowercase() == expected.to_lowercase();
            Check {
                name: probe.name.clone(),
                passed,
                expected: Some(expected.clone()),
                actual: Some(actual.clone()),
                message: format!("{}: expected {expected}, got {actual}", probe.name),
                fix_instruction: (!passed).then(|| probe.fix_instruction.clone()).flatten(),
            }
        }
        Err(e) => {
            warn!("Readiness probe '{}' failed: {}", probe.name, e);
            Check {
                name: probe.name.clone(),
                passed: false,
                expected: Some(expected),
                actual: None,
                message: format!("{}: probe failed - {e}", probe.name),
                fix_instruction: probe.fix_instruction.clone(),
            }
        }
    }
}

async fn scalar_text(conn: &mut PgConnection, query: &str) -> Result<String> {
    let row = sqlx::query(query)
        .fetch_one(conn)
        .await
        .map_err(|e| DataflowError::QueryFailed(e.to_string()))?;

    if let Ok(v) = row.try_get::<String, _>(0) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<i64, _>(0) {
        return Ok(v.to_string());
    }
    if let Ok(v) = row.try_get::<i32, _>(0) {
        return Ok(v.to_string());
    }
    if let Ok(v) = row.try_get::<bool, _>(0) {
        return Ok(v.to_string());
    }
    Err(DataflowError::QueryFailed(
        "probe returned a non-scalar value".to_string(),
    ))
}

async fn check_table(conn: &mut PgConnection, schema: &str, table: &str) -> Result<TableCheck> {
    let exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
    )
    .bind(schema)
    .bind(table)
    .fetch_one(&mut *conn)
    .await?;

    if exists == 0 {
        return Ok(TableCheck {
            table_name: String::new(),
            exists: false,
            has_primary_key: false,
            replica_identity: "UNKNOWN".to_string(),
            passed: false,
            issues: vec![format!("Table {schema}.{table} not found")],
            fix_instruction: None,
        });
    }

    let pk_count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM information_schema.table_constraints
        WHERE table_schema = $1
          AND table_name = $2
          AND constraint_type = 'PRIMARY KEY'
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_one(&mut *conn)
    .await?;
    let has_primary_key = pk_count > 0;

    let ident: Option<String> = sqlx::query_scalar(
        r#"
        SELECT relreplident::text
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1
          AND c.relname = $2
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_optional(&mut *conn)
    .await?;

    let replica_identity = match ident.as_deref() {
        Some("d") => "DEFAULT",
        Some("n") => "NOTHING",
        Some("f") => "FULL",
        Some("i") => "INDEX",
        _ => "UNKNOWN",
    }
    .to_string();

    let mut issues = Vec::new();
    if !has_primary_key {
        issues.push("Table has no primary key".to_string());
    }
    if replica_identity == "NOTHING" {
        issues.push("REPLICA IDENTITY is set to NOTHING - CDC will not capture changes".to_string());
    } else if replica_identity == "DEFAULT" && !has_primary_key {
        issues.push("REPLICA IDENTITY is DEFAULT but no primary key exists".to_string());
    }

    let passed = issues.is_empty();
    let fix_instruction = if passed {
        None
    } else {
        let mut fixes = Vec::new();
        if !has_primary_key {
            fixes.push(format!(
                "Add a primary key: ALTER TABLE {schema}.{table} ADD PRIMARY KEY (column_name);"
            ));
        }
        if matches!(replica_identity.as_str(), "NOTHING" | "DEFAULT") {
            fixes.push(format!(
                "Set REPLICA IDENTITY to FULL: ALTER TABLE {schema}.{table} REPLICA IDENTITY FULL;"
            ));
        }
        Some(fixes.join(" OR "))
    };

    Ok(TableCheck {
        table_name: String::new(),
        exists: true,
        has_primary_key,
        replica_identity,
        passed,
        issues,
        fix_instruction,
    })
}

fn build_recommendations(
    checks: &[Check],
    provider: Provider,
    table_checks: &[TableCheck],
) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    for check in checks {
        if check.passed {
            continue;
        }
        match check.name.as_str() {
            "WAL Level" => recommendations.push(Recommendation {
                priority: Priority::Critical,
                title: "Enable Logical Replication".to_string(),
                description: check
                    .fix_instruction
                    .clone()
                    .unwrap_or_else(|| provider.wal_fix().to_string()),
            }),
            "Replication Privilege" => recommendations.push(Recommendation {
                priority: Priority::Critical,
                title: "Grant Replication Privilege".to_string(),
                description: check
                    .fix_instruction
                    .clone()
                    .unwrap_or_else(|| provider.replication_fix().to_string()),
            }),
            "Replication Slots" => recommendations.push(Recommendation {
                priority: Priority::Warning,
                title: "Increase Replication Slots".to_string(),
                description: check.fix_instruction.clone().unwrap_or_default(),
            }),
            "WAL Senders" => recommendations.push(Recommendation {
                priority: Priority::Warning,
                title: "Increase WAL Senders".to_string(),
                description: check.fix_instruction.clone().unwrap_or_default(),
            }),
            other => recommendations.push(Recommendation {
                priority: Priority::Warning,
                title: format!("Fix: {other}"),
                description: check.fix_instruction.clone().unwrap_or_else(|| check.message.clone()),
            }),
        }
    }

    for table_check in table_checks {
        if !table_check.passed && table_check.exists {
            recommendations.push(Recommendation {
                priority: Priority::High,
                title: format!("Fix Table: {}", table_check.table_name),
                description: table_check
                    .fix_instruction
                    .clone()
                    .unwrap_or_else(|| table_check.issues.join("; ")),
            });
        }
    }

    if recommendations.is_empty() {
        recommendations.push(Recommendation {
            priority: Priority::Info,
            title: "Database is Ready for CDC".to_string(),
            description: "All prerequisites are met. You can proceed with setting up CDC pipelines."
                .to_string(),
        });
    }

    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_table() {
        assert_eq!(
            split_table("public.orders"),
            ("public".to_string(), "orders".to_string())
        );
        assert_eq!(
            split_table("orders"),
            ("public".to_string(), "orders".to_string())
        );
    }

    #[test]
    fn test_provider_fixes_differ() {
        assert_ne!(Provider::AwsRds.wal_fix(), Provider::SelfHosted.wal_fix());
        assert!(Provider::AwsRds.replication_fix().contains("rds_replication"));
    }

    #[test]
    fn test_recommendations_prioritized() {
        let checks = vec![
            Check {
                name: "WAL Level".to_string(),
                passed: false,
                expected: Some("logical".to_string()),
                actual: Some("replica".to_string()),
                message: "WAL level is 'replica'".to_string(),
                fix_instruction: Some("set wal_level".to_string()),
            },
            Check {
                name: "Replication Slots".to_string(),
                passed: false,
                expected: None,
                actual: None,
                message: "0 slots".to_string(),
                fix_instruction: Some("raise max_replication_slots".to_string()),
            },
        ];
        let tables = vec![TableCheck {
            table_name: "public.orders".to_string(),
            exists: true,
            has_primary_key: false,
            replica_identity: "DEFAULT".to_string(),
            passed: false,
            issues: vec!["Table has no primary key".to_string()],
            fix_instruction: Some("add pk".to_string()),
        }];

        let recs = build_recommendations(&checks, Provider::SelfHosted, &tables);
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0].priority, Priority::Critical);
        assert_eq!(recs[1].priority, Priority::Warning);
        assert_eq!(recs[2].priority, Priority::High);
    }

    #[test]
    fn test_all_passed_yields_info() {
        let recs = build_recommendations(&[], Provider::SelfHosted, &[]);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].priority, Priority::Info);
    }
}
