//! Schema-registry client
//!
//! Subject registration, retrieval, compatibility checks, and deletion over
//! the registry REST API with basic auth.

use crate::common::config::SchemaRegistryConfig;
use crate::errors::{DataflowError, Result};
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Client for a Confluent-compatible schema registry.
pub struct SchemaRegistryClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl SchemaRegistryClient {
    pub fn new(config: &SchemaRegistryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .header("Content-Type", "application/vnd.schemaregistry.v1+json")
    }

    /// Register a schema under a subject; returns the schema id.
    pub async fn register(&self, subject: &str, schema: &serde_json::Value) -> Result<i64> {
        let response = self
            .request(
                self.client
                    .post(format!("{}/subjects/{}/versions", self.base_url, subject)),
            )
            .json(&serde_json::json!({"schema": schema.to_string()}))
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        let id = body
            .get("id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| DataflowError::external("schema-registry", "register response missing id"))?;
        info!("Registered schema for subject {} (id {})", subject, id);
        Ok(id)
    }

    /// Fetch a subject version (`latest` or a number). None if absent.
    pub async fn get_version(
        &self,
        subject: &str,
        version: &str,
    ) -> Result<Option<serde_json::Value>> {
        let response = self
            .request(self.client.get(format!(
                "{}/subjects/{}/versions/{}",
                self.base_url, subject, version
            )))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        Ok(Some(response.json().await?))
    }

    /// The schema id registered for a topic's value subject, if any.
    pub async fn value_schema_id(&self, topic: &str) -> Result<Option<i64>> {
        let subject = format!("{topic}-value");
        Ok(self
            .get_version(&subject, "latest")
            .await?
            .and_then(|v| v.get("id").and_then(|id| id.as_i64())))
    }

    /// Wait (bounded) for the connector to register a topic's value schema.
    /// Returns None when nothing shows up; the caller then declares columns
    /// and lets the processor register its own schema.
    pub async fn wait_for_value_schema_id(
        &self,
        topic: &str,
        max_attempts: u32,
        delay: Duration,
    ) -> Option<i64> {
        for attempt in 1..=max_attempts {
            match self.value_schema_id(topic).await {
                Ok(Some(id)) => {
                    info!("Found existing schema id {} for {}-value", id, topic);
                    return Some(id);
                }
                Ok(None) => {
                    if attempt < max_attempts {
                        info!(
                            "Schema not yet registered for {}-value, waiting (attempt {}/{})",
                            topic, attempt, max_attempts
                        );
                    }
                }
                Err(e) => {
                    warn!("Error fetching schema for {}-value: {}", topic, e);
                }
            }
            if attempt < max_attempts {
                sleep(delay).await;
            }
        }
        warn!(
            "No schema found for {}-value after {} attempts",
            topic, max_attempts
        );
        None
    }

    /// Check whether a schema is compatible with the latest subject version.
    pub async fn check_compatibility(
        &self,
        subject: &str,
        schema: &serde_json::Value,
    ) -> Result<bool> {
        let response = self
            .request(self.client.post(format!(
                "{}/compatibility/subjects/{}/versions/latest",
                self.base_url, subject
            )))
            .json(&serde_json::json!({"schema": schema.to_string()}))
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        Ok(body
            .get("is_compatible")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    /// Delete a subject; 404 is success.
    pub async fn delete_subject(&self, subject: &str, permanent: bool) -> Result<()> {
        let mut url = format!("{}/subjects/{}", self.base_url, subject);
        if permanent {
            url.push_str("?permanent=true");
        }
        let response = self.request(self.client.delete(url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        response.error_for_status()?;
        info!("Deleted subject {}", subject);
        Ok(())
    }
}
