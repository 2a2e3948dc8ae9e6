//! Hub configuration
//!
//! One YAML file describes every external endpoint the control plane talks
//! to, plus pricing and monitor settings. Loaded once at startup; sections
//! all have working local-development defaults.

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from file and environment.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HubConfig {
    /// Metadata database (control-plane state)
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Kafka broker + SASL credentials
    #[serde(default)]
    pub kafka: KafkaConfig,

    /// Kafka Connect control plane
    #[serde(default)]
    pub connect: ConnectConfig,

    /// Stream processor (ksqlDB-compatible)
    #[serde(default)]
    pub processor: ProcessorConfig,

    /// Schema registry
    #[serde(default)]
    pub schema_registry: SchemaRegistryConfig,

    /// ClickHouse sink warehouse
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,

    /// SMTP alert transport
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Background monitor
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Pricing model for cost estimation
    #[serde(default)]
    pub pricing: PricingConfig,

    /// Module descriptor directory
    #[serde(default)]
    pub modules: ModulesConfig,

    /// Key material for the credential vault
    #[serde(default)]
    pub vault: VaultConfig,
}

impl HubConfig {
    /// Load configuration from file and environment.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Get config file path
    fn config_path() -> PathBuf {
        std::env::var("DATAFLOW_HUB_CONFIG")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("dataflow-hub.yaml"))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetadataConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Seconds
    pub connection_timeout: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "dataflow_hub".to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            max_connections: 20,
            min_connections: 2,
            connection_timeout: 30,
        }
    }
}

impl MetadataConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    /// SASL-PLAIN API key; empty means plaintext local broker.
    pub api_key: String,
    pub api_secret: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
        }
    }
}

impl KafkaConfig {
    pub fn uses_sasl(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectConfig {
    pub url: String,
    /// Seconds; provisioning calls are slower than probes.
    pub provision_timeout: u64,
    pub probe_timeout: u64,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8083".to_string(),
            provision_timeout: 30,
            probe_timeout: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorConfig {
    pub url: String,
    pub timeout: u64,
    pub default_partitions: i32,
    pub default_replicas: i32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8088".to_string(),
            timeout: 30,
            default_partitions: 3,
            default_replicas: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SchemaRegistryConfig {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClickHouseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub timeout: u64,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8123,
            username: "default".to_string(),
            password: String::new(),
            database: "dataflow".to_string(),
            timeout: 30,
        }
    }
}

impl ClickHouseConfig {
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub use_starttls: bool,
    pub from_address: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1025,
            use_starttls: false,
            from_address: "alerts@dataflow-hub.local".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Seconds between monitoring sweeps
    pub interval_seconds: u64,
    /// Trailing window for source-table metrics, minutes
    pub metric_window_minutes: i64,
    /// Seconds budget for one pipeline's check
    pub per_pipeline_timeout: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            metric_window_minutes: 60,
            per_pipeline_timeout: 30,
        }
    }
}

/// Cost model. All rates are configuration, not constants.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PricingConfig {
    /// $/task/hour for connector tasks
    pub connector_task_hour: f64,
    /// $/GB transferred
    pub throughput_gb: f64,
    /// $/GB/month retained in Kafka
    pub kafka_storage_gb_month: f64,
    /// Default topic retention, days
    pub kafka_retention_days: f64,
    /// $/capacity-unit/hour for stream processing
    pub processor_csu_hour: f64,
    /// Minimum capacity units for simple processing
    pub processor_min_csu: f64,
    /// $/GB/month in the sink warehouse
    pub sink_storage_gb_month: f64,
    /// Per-resource daily rates used for teardown savings
    #[serde(default)]
    pub daily_rates: DailyRates,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DailyRates {
    pub source_connector: f64,
    pub sink_connector: f64,
    pub ksqldb_stream: f64,
    pub ksqldb_table: f64,
    pub kafka_topic: f64,
    pub clickhouse_table: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            connector_task_hour: 0.01,
            throughput_gb: 0.10,
            kafka_storage_gb_month: 0.10,
            kafka_retention_days: 30.0,
            processor_csu_hour: 0.10,
            processor_min_csu: 0.5,
            sink_storage_gb_month: 0.02,
            daily_rates: DailyRates::default(),
        }
    }
}

impl Default for DailyRates {
    fn default() -> Self {
        Self {
            source_connector: 0.24,
            sink_connector: 0.24,
            ksqldb_stream: 0.10,
            ksqldb_table: 0.10,
            kafka_topic: 0.05,
            clickhouse_table: 0.02,
        }
    }
}

impl PricingConfig {
    /// $/task/day
    pub fn connector_task_day(&self) -> f64 {
        self.connector_task_hour * 24.0
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModulesConfig {
    pub config_dir: PathBuf,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("modules"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VaultConfig {
    /// Process-wide key material; SHA-256-derived into the AES key.
    pub encryption_key: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            encryption_key: "dev-key-change-in-production-minimum-32-chars".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.metadata.port, 5432);
        assert_eq!(config.monitor.interval_seconds, 60);
        assert_eq!(config.pricing.kafka_retention_days, 30.0);
        assert!(!config.kafka.uses_sasl());
    }

    #[test]
    fn test_connector_task_day_derived() {
        let pricing = PricingConfig::default();
        assert!((pricing.connector_task_day() - 0.24).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_yaml_falls_back_to_defaults() {
        let yaml = "monitor:\n  interval_seconds: 15\n";
        let config: HubConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.monitor.interval_seconds, 15);
        assert_eq!(config.monitor.metric_window_minutes, 60);
        assert_eq!(config.clickhouse.port, 8123);
    }
}
