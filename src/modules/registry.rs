//! Module registry
//!
//! Loads source, sink, and transform descriptors from YAML files at startup.
//! A source descriptor carries capability flags, credential field shapes, a
//! parameterized connector-configuration template, a schema-discovery query,
//! and CDC-readiness probes. A sink descriptor adds a source-to-sink type
//! mapping, a CREATE-TABLE template, and cost factors.
//!
//! Templates are flat keyed maps with `${path.to.value}` placeholders bound
//! against a JSON context at call time; the registry itself stays strictly
//! declarative.

use crate::errors::{DataflowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Basic module information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_icon() -> String {
    "database".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// What a module can do
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleCapabilities {
    #[serde(default)]
    pub supports_cdc: bool,
    #[serde(default)]
    pub supports_full_load: bool,
    #[serde(default)]
    pub supports_incremental: bool,
    #[serde(default)]
    pub supports_upsert: bool,
    #[serde(default)]
    pub supports_delete: bool,
    #[serde(default)]
    pub supported_formats: Vec<String>,
}

/// A credential field definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialField {
    pub name: String,
    #[serde(default = "default_field_type", rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub options: Vec<String>,
}

fn default_field_type() -> String {
    "string".to_string()
}

fn default_required() -> bool {
    true
}

/// One CDC-readiness probe: a query or setting to read and the expected value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessProbe {
    pub name: String,
    pub query: String,
    pub expected: serde_json::Value,
    #[serde(default)]
    pub fix_instruction: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CredentialsSection {
    #[serde(default)]
    required: Vec<CredentialField>,
    #[serde(default)]
    optional: Vec<CredentialField>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConnectorTemplate {
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    config: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SchemaDiscoverySection {
    #[serde(default)]
    query: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ReadinessSection {
    #[serde(default)]
    probes: Vec<ReadinessProbe>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDescriptor {
    module: ModuleInfo,
    #[serde(default)]
    capabilities: ModuleCapabilities,
    #[serde(default)]
    credentials: CredentialsSection,
    #[serde(default)]
    connector_template: ConnectorTemplate,
    #[serde(default)]
    schema_discovery: SchemaDiscoverySection,
    #[serde(default)]
    cdc_readiness_check: ReadinessSection,
    #[serde(default)]
    type_mapping: BTreeMap<String, String>,
    #[serde(default)]
    table_template: String,
    #[serde(default)]
    cost_factors: BTreeMap<String, f64>,
}

/// Complete module configuration
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub info: ModuleInfo,
    pub capabilities: ModuleCapabilities,
    pub required_credentials: Vec<CredentialField>,
    pub optional_credentials: Vec<CredentialField>,
    connector_class: Option<String>,
    connector_config: BTreeMap<String, serde_json::Value>,
    pub schema_discovery_query: Option<String>,
    pub readiness_probes: Vec<ReadinessProbe>,
    pub type_mapping: BTreeMap<String, String>,
    pub table_template: String,
    pub cost_factors: BTreeMap<String, f64>,
}

impl From<RawDescriptor> for ModuleDescriptor {
    fn from(raw: RawDescriptor) -> Self {
        Self {
            info: raw.module,
            capabilities: raw.capabilities,
            required_credentials: raw.credentials.required,
            optional_credentials: raw.credentials.optional,
            connector_class: raw.connector_template.class,
            connector_config: raw.connector_template.config,
            schema_discovery_query: raw.schema_discovery.query,
            readiness_probes: raw.cdc_readiness_check.probes,
            type_mapping: raw.type_mapping,
            table_template: raw.table_template,
            cost_factors: raw.cost_factors,
        }
    }
}

/// Registry of loaded module descriptors.
pub struct ModuleRegistry {
    config_dir: PathBuf,
    sources: HashMap<String, ModuleDescriptor>,
    sinks: HashMap<String, ModuleDescriptor>,
    transforms: HashMap<String, serde_json::Value>,
}

impl ModuleRegistry {
    /// Load all module configs from `<config_dir>/{sources,sinks,transforms}`.
    pub fn load(config_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut registry = Self {
            config_dir: config_dir.into(),
            sources: HashMap::new(),
            sinks: HashMap::new(),
            transforms: HashMap::new(),
        };
        registry.load_all()?;
        Ok(registry)
    }

    fn load_all(&mut self) -> Result<()> {
        self.load_descriptors("sources")?;
        self.load_descriptors("sinks")?;
        self.load_transforms()?;
        info!(
            "Loaded {} sources, {} sinks, {} transforms",
            self.sources.len(),
            self.sinks.len(),
            self.transforms.len()
        );
        Ok(())
    }

    fn yaml_files(dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let is_yaml = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
                    .unwrap_or(false);
                if is_yaml {
                    files.push(path);
                }
            }
        }
        files.sort();
        files
    }

    fn load_descriptors(&mut self, kind: &str) -> Result<()> {
        let dir = self.config_dir.join(kind);
        for path in Self::yaml_files(&dir) {
            match std::fs::read_to_string(&path)
                .map_err(DataflowError::from)
                .and_then(|s| serde_yaml::from_str::<RawDescriptor>(&s).map_err(DataflowError::from))
            {
                Ok(raw) => {
                    let descriptor = ModuleDescriptor::from(raw);
                    let name = descriptor.info.name.clone();
                    info!("Loaded {} module: {}", kind.trim_end_matches('s'), name);
                    if kind == "sources" {
                        self.sources.insert(name, descriptor);
                    } else {
                        self.sinks.insert(name, descriptor);
                    }
                }
                Err(e) => {
                    error!("Failed to load module descriptor {}: {}", path.display(), e);
                }
            }
        }
        Ok(())
    }

    fn load_transforms(&mut self) -> Result<()> {
        let dir = self.config_dir.join("transforms");
        for path in Self::yaml_files(&dir) {
            match std::fs::read_to_string(&path)
                .map_err(DataflowError::from)
                .and_then(|s| serde_yaml::from_str::<serde_json::Value>(&s).map_err(DataflowError::from))
            {
                Ok(value) => {
                    if let Some(name) = value
                        .get("transform")
                        .and_then(|t| t.get("name"))
                        .and_then(|n| n.as_str())
                    {
                        self.transforms.insert(name.to_string(), value.clone());
                        info!("Loaded transform: {}", name);
                    }
                }
                Err(e) => {
                    error!("Failed to load transform {}: {}", path.display(), e);
                }
            }
        }
        Ok(())
    }

    /// Reload all module configurations (explicit operator command only).
    pub fn reload(&mut self) -> Result<()> {
        self.sources.clear();
        self.sinks.clear();
        self.transforms.clear();
        self.load_all()
    }

    pub fn get_source(&self, name: &str) -> Result<&ModuleDescriptor> {
        self.sources
            .get(name)
            .ok_or_else(|| DataflowError::UnknownModule(name.to_string()))
    }

    pub fn get_sink(&self, name: &str) -> Result<&ModuleDescriptor> {
        self.sinks
            .get(name)
            .ok_or_else(|| DataflowError::UnknownModule(name.to_string()))
    }

    pub fn get_transform(&self, name: &str) -> Result<&serde_json::Value> {
        self.transforms
            .get(name)
            .ok_or_else(|| DataflowError::UnknownModule(name.to_string()))
    }

    pub fn list_sources(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn list_sinks(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sinks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn list_transforms(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transforms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn descriptor(&self, name: &str) -> Result<&ModuleDescriptor> {
        self.sources
            .get(name)
            .or_else(|| self.sinks.get(name))
            .ok_or_else(|| DataflowError::UnknownModule(name.to_string()))
    }

    /// Render a module's connector template against a context.
    ///
    /// Every value becomes a string; unresolved placeholders and non-scalar
    /// results are `BadTemplate`. The connector class is added under
    /// `connector.class`.
    pub fn render_connector_config(
        &self,
        module_name: &str,
        context: &serde_json::Value,
    ) -> Result<BTreeMap<String, String>> {
        let module = self.descriptor(module_name)?;

        let mut rendered = BTreeMap::new();
        for (key, value) in &module.connector_config {
            let text = render_value(value, context).map_err(|reason| DataflowError::BadTemplate {
                module: module_name.to_string(),
                reason: format!("key '{key}': {reason}"),
            })?;
            rendered.insert(key.clone(), text);
        }

        if let Some(class) = &module.connector_class {
            rendered.insert("connector.class".to_string(), class.clone());
        }

        Ok(rendered)
    }

    /// Render a sink module's CREATE-TABLE template.
    pub fn render_table_template(
        &self,
        module_name: &str,
        context: &serde_json::Value,
    ) -> Result<String> {
        let module = self.get_sink(module_name)?;
        if module.table_template.is_empty() {
            return Err(DataflowError::BadTemplate {
                module: module_name.to_string(),
                reason: "no table template".to_string(),
            });
        }
        substitute(&module.table_template, context).map_err(|reason| DataflowError::BadTemplate {
            module: module_name.to_string(),
            reason,
        })
    }

    /// Map a source data type to the sink type: exact match, then prefix
    /// match, then the configured `default`.
    pub fn map_type(&self, sink_name: &str, source_type: &str) -> Result<String> {
        let module = self.get_sink(sink_name)?;
        let source_lower = source_type.to_lowercase();

        if let Some(mapped) = module.type_mapping.get(&source_lower) {
            return Ok(mapped.clone());
        }

        for (key, value) in &module.type_mapping {
            if key != "default" && source_lower.starts_with(key.as_str()) {
                return Ok(value.clone());
            }
        }

        Ok(module
            .type_mapping
            .get("default")
            .cloned()
            .unwrap_or_else(|| "String".to_string()))
    }

    pub fn cost_factors(&self, module_name: &str) -> Result<&BTreeMap<String, f64>> {
        Ok(&self.descriptor(module_name)?.cost_factors)
    }
}

/// Substitute `${path.to.value}` placeholders in a template string.
fn substitute(template: &str, context: &serde_json::Value) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("unterminated placeholder near '{}'", &rest[start..]))?;
        let path = &after[..end];
        let value = lookup(context, path).ok_or_else(|| format!("unresolved placeholder '${{{path}}}'"))?;
        out.push_str(&scalar_to_string(&value)?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn render_value(
    value: &serde_json::Value,
    context: &serde_json::Value,
) -> std::result::Result<String, String> {
    match value {
        serde_json::Value::String(s) => substitute(s, context),
        other => scalar_to_string(other),
    }
}

fn scalar_to_string(value: &serde_json::Value) -> std::result::Result<String, String> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        serde_json::Value::Array(items) => {
            let parts: std::result::Result<Vec<String>, String> =
                items.iter().map(scalar_to_string).collect();
            Ok(parts?.join(","))
        }
        serde_json::Value::Null => Err("null value".to_string()),
        serde_json::Value::Object(_) => Err("nested object is not a scalar".to_string()),
    }
}

fn lookup(context: &serde_json::Value, path: &str) -> Option<serde_json::Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const POSTGRES_DESCRIPTOR: &str = r#"
module:
  name: postgresql
  display_name: PostgreSQL
capabilities:
  supports_cdc: true
  supports_full_load: true
  supported_formats: [avro, json]
credentials:
  required:
    - name: host
      type: string
      label: Host
    - name: password
      type: password
      label: Password
      encrypted: true
connector_template:
  class: io.debezium.connector.postgresql.PostgresConnector
  config:
    database.hostname: "${credentials.host}"
    database.port: "${credentials.port}"
    topic.prefix: "${pipeline.topic_prefix}"
    table.include.list: "${tables}"
schema_discovery:
  query: SELECT table_name FROM information_schema.tables
cdc_readiness_check:
  probes:
    - name: WAL Level
      query: SHOW wal_level
      expected: logical
"#;

    const CLICKHOUSE_DESCRIPTOR: &str = r#"
module:
  name: clickhouse
  display_name: ClickHouse
capabilities:
  supports_upsert: true
type_mapping:
  integer: Int32
  bigint: Int64
  varchar: String
  timestamp: DateTime64(3)
  default: String
table_template: "CREATE TABLE IF NOT EXISTS ${database}.${table_name} (${columns})"
cost_factors:
  storage_gb_month: 0.02
"#;

    fn registry_with_fixtures() -> (tempfile::TempDir, ModuleRegistry) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sources")).unwrap();
        std::fs::create_dir_all(dir.path().join("sinks")).unwrap();

        let mut f = std::fs::File::create(dir.path().join("sources/postgresql.yaml")).unwrap();
        f.write_all(POSTGRES_DESCRIPTOR.as_bytes()).unwrap();
        let mut f = std::fs::File::create(dir.path().join("sinks/clickhouse.yaml")).unwrap();
        f.write_all(CLICKHOUSE_DESCRIPTOR.as_bytes()).unwrap();

        let registry = ModuleRegistry::load(dir.path()).unwrap();
        (dir, registry)
    }

    #[test]
    fn test_load_and_lookup() {
        let (_dir, registry) = registry_with_fixtures();
        assert_eq!(registry.list_sources(), vec!["postgresql"]);
        assert_eq!(registry.list_sinks(), vec!["clickhouse"]);
        assert!(registry.get_source("postgresql").unwrap().capabilities.supports_cdc);
        assert!(matches!(
            registry.get_source("mongodb"),
            Err(DataflowError::UnknownModule(_))
        ));
    }

    #[test]
    fn test_render_connector_config() {
        let (_dir, registry) = registry_with_fixtures();
        let context = serde_json::json!({
            "credentials": {"host": "db.example", "port": 5432},
            "pipeline": {"topic_prefix": "dataflow_abc"},
            "tables": ["public.orders", "public.users"],
        });
        let config = registry.render_connector_config("postgresql", &context).unwrap();
        assert_eq!(config["database.hostname"], "db.example");
        assert_eq!(config["database.port"], "5432");
        assert_eq!(config["table.include.list"], "public.orders,public.users");
        assert_eq!(
            config["connector.class"],
            "io.debezium.connector.postgresql.PostgresConnector"
        );
    }

    #[test]
    fn test_render_missing_placeholder_is_bad_template() {
        let (_dir, registry) = registry_with_fixtures();
        let context = serde_json::json!({"credentials": {}});
        let err = registry.render_connector_config("postgresql", &context).unwrap_err();
        assert!(matches!(err, DataflowError::BadTemplate { .. }));
    }

    #[test]
    fn test_type_mapping_exact_prefix_default() {
        let (_dir, registry) = registry_with_fixtures();
        assert_eq!(registry.map_type("clickhouse", "integer").unwrap(), "Int32");
        // Prefix fallback: "timestamp without time zone" starts with "timestamp"
        assert_eq!(
            registry.map_type("clickhouse", "timestamp without time zone").unwrap(),
            "DateTime64(3)"
        );
        assert_eq!(registry.map_type("clickhouse", "jsonb").unwrap(), "String");
    }

    #[test]
    fn test_type_mapping_is_stable() {
        let (_dir, registry) = registry_with_fixtures();
        let first = registry.map_type("clickhouse", "bigint").unwrap();
        let second = registry.map_type("clickhouse", "bigint").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_table_template_render() {
        let (_dir, registry) = registry_with_fixtures();
        let sql = registry
            .render_table_template(
                "clickhouse",
                &serde_json::json!({"database": "dataflow", "table_name": "orders", "columns": "id Int64"}),
            )
            .unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS dataflow.orders (id Int64)"
        );
    }

    #[test]
    fn test_readiness_probes_exposed() {
        let (_dir, registry) = registry_with_fixtures();
        let probes = &registry.get_source("postgresql").unwrap().readiness_probes;
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].name, "WAL Level");
        assert_eq!(probes[0].expected, serde_json::json!("logical"));
    }
}
