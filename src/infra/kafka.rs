//! Kafka topic administration
//!
//! Topic create/list/describe/delete through the broker admin API, with
//! SASL-PLAIN over TLS when API credentials are configured. "Already exists"
//! on create is tolerated so provisioning retries stay idempotent.

use crate::common::config::KafkaConfig;
use crate::errors::{DataflowError, Result};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Topic settings used at creation time.
#[derive(Debug, Clone)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
    pub retention_ms: i64,
    /// `delete` or `compact`
    pub cleanup_policy: String,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: 3,
            replication_factor: 3,
            retention_ms: 7 * 24 * 60 * 60 * 1000,
            cleanup_policy: "delete".to_string(),
        }
    }
}

/// Description of one live topic.
#[derive(Debug, Clone, Serialize)]
pub struct TopicInfo {
    pub name: String,
    pub partitions: Vec<PartitionInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionInfo {
    pub id: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
}

/// Topic manager over the broker admin API.
pub struct TopicManager {
    admin_client: AdminClient<DefaultClientContext>,
    bootstrap_servers: String,
}

impl TopicManager {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", "dataflow-hub-topic-manager");

        if config.uses_sasl() {
            client_config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", &config.api_key)
                .set("sasl.password", &config.api_secret);
        }

        let admin_client: AdminClient<DefaultClientContext> = client_config.create()?;

        Ok(Self {
            admin_client,
            bootstrap_servers: config.bootstrap_servers.clone(),
        })
    }

    /// Create a topic. Returns `true` if created, `false` if it already
    /// existed.
    pub async fn create_topic(&self, spec: &TopicSpec) -> Result<bool> {
        debug!(
            "Creating topic {} ({} partitions, RF={})",
            spec.name, spec.partitions, spec.replication_factor
        );

        let retention = spec.retention_ms.to_string();
        let new_topic = NewTopic::new(
            &spec.name,
            spec.partitions,
            TopicReplication::Fixed(spec.replication_factor),
        )
        .set("retention.ms", &retention)
        .set("cleanup.policy", &spec.cleanup_policy);

        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(30)));
        let results = self.admin_client.create_topics(&[new_topic], &opts).await?;

        for result in results {
            match result {
                Ok(_) => {
                    info!("Created topic: {}", spec.name);
                    return Ok(true);
                }
                Err((topic, err)) => {
                    if err.to_string().to_lowercase().contains("already exists") {
                        info!("Topic already exists: {}", topic);
                        return Ok(false);
                    }
                    return Err(DataflowError::external(
                        "kafka",
                        format!("create topic {topic} failed: {err}"),
                    ));
                }
            }
        }

        Ok(true)
    }

    /// List all topics, optionally filtered by prefix.
    pub async fn list_topics(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let metadata = self
            .admin_client
            .inner()
            .fetch_metadata(None, Duration::from_secs(30))?;

        let mut topics: Vec<String> = metadata
            .topics()
            .iter()
            .map(|t| t.name().to_string())
            .filter(|name| prefix.map(|p| name.starts_with(p)).unwrap_or(true))
            .collect();
        topics.sort();

        debug!("Found {} topics on {}", topics.len(), self.bootstrap_servers);
        Ok(topics)
    }

    /// Describe one topic; None when it does not exist.
    pub async fn describe_topic(&self, name: &str) -> Result<Option<TopicInfo>> {
        let metadata = self
            .admin_client
            .inner()
            .fetch_metadata(Some(name), Duration::from_secs(10))?;

        let topic = metadata.topics().iter().find(|t| t.name() == name);
        let Some(topic) = topic else {
            return Ok(None);
        };
        if topic.partitions().is_empty() {
            return Ok(None);
        }

        Ok(Some(TopicInfo {
            name: name.to_string(),
            partitions: topic
                .partitions()
                .iter()
                .map(|p| PartitionInfo {
                    id: p.id(),
                    leader: p.leader(),
                    replicas: p.replicas().to_vec(),
                    isr: p.isr().to_vec(),
                })
                .collect(),
        }))
    }

    /// Delete one topic.
    pub async fn delete_topic(&self, name: &str) -> Result<()> {
        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(30)));
        let results = self.admin_client.delete_topics(&[name], &opts).await?;

        for result in results {
            if let Err((topic, err)) = result {
                // Unknown topic means someone already deleted it.
                if err.to_string().to_lowercase().contains("unknown topic") {
                    warn!("Topic already gone: {}", topic);
                    return Ok(());
                }
                return Err(DataflowError::external(
                    "kafka",
                    format!("delete topic {topic} failed: {err}"),
                ));
            }
        }

        info!("Deleted topic: {}", name);
        Ok(())
    }

    /// Delete many topics; per-topic outcomes, failures do not stop the rest.
    pub async fn delete_topics(&self, names: &[String]) -> Result<Vec<(String, Option<String>)>> {
        if names.is_empty() {
            return Ok(vec![]);
        }

        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(30)));
        let results = self.admin_client.delete_topics(&refs, &opts).await?;

        Ok(results
            .into_iter()
            .map(|result| match result {
                Ok(topic) => (topic, None),
                Err((topic, err)) => (topic, Some(err.to_string())),
            })
            .collect())
    }
}
