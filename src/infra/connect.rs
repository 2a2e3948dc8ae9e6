//! Kafka Connect control-plane client
//!
//! REST operations against the connector control plane: create, status,
//! pause/resume/restart, delete, list. A 404 on delete is success - the
//! connector is already gone.

use crate::common::config::ConnectConfig;
use crate::errors::{DataflowError, Result};
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Serialize)]
struct CreateConnectorRequest<'a> {
    name: &'a str,
    config: &'a BTreeMap<String, String>,
}

/// Client for a Kafka Connect cluster.
pub struct ConnectClient {
    client: reqwest::Client,
    base_url: String,
    provision_timeout: Duration,
    probe_timeout: Duration,
}

impl ConnectClient {
    pub fn new(config: &ConnectConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provision_timeout))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            provision_timeout: Duration::from_secs(config.provision_timeout),
            probe_timeout: Duration::from_secs(config.probe_timeout),
        })
    }

    fn connectors_url(&self) -> String {
        format!("{}/connectors", self.base_url)
    }

    /// Submit a connector configuration.
    #[instrument(skip(self, config))]
    pub async fn create_connector(
        &self,
        name: &str,
        config: &BTreeMap<String, String>,
    ) -> Result<serde_json::Value> {
        info!("Creating connector: {}", name);

        let response = self
            .client
            .post(self.connectors_url())
            .timeout(self.provision_timeout)
            .json(&CreateConnectorRequest { name, config })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DataflowError::external(
                "kafka-connect",
                format!("create {name} returned {status}: {body}"),
            ));
        }

        Ok(response.json().await?)
    }

    /// Connector status; a missing connector reports state `NOT_FOUND`.
    pub async fn status(&self, name: &str) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}/{}/status", self.connectors_url(), name))
            .timeout(self.probe_timeout)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(serde_json::json!({
                "name": name,
                "connector": {"state": "NOT_FOUND"},
            }));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DataflowError::external(
                "kafka-connect",
                format!("status {name} returned {status}: {body}"),
            ));
        }

        Ok(response.json().await?)
    }

    pub async fn pause(&self, name: &str) -> Result<()> {
        self.simple_put(name, "pause").await
    }

    pub async fn resume(&self, name: &str) -> Result<()> {
        self.simple_put(name, "resume").await
    }

    async fn simple_put(&self, name: &str, action: &str) -> Result<()> {
        let response = self
            .client
            .put(format!("{}/{}/{}", self.connectors_url(), name, action))
            .timeout(self.probe_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DataflowError::external(
                "kafka-connect",
                format!("{action} {name} returned {status}: {body}"),
            ));
        }
        info!("Connector {}: {}", action, name);
        Ok(())
    }

    pub async fn restart(&self, name: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/{}/restart", self.connectors_url(), name))
            .timeout(self.probe_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DataflowError::external(
                "kafka-connect",
                format!("restart {name} returned {status}: {body}"),
            ));
        }
        info!("Restarted connector: {}", name);
        Ok(())
    }

    /// Delete a connector. 404 is success.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/{}", self.connectors_url(), name))
            .timeout(self.probe_timeout)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            warn!("Connector {} already deleted", name);
            return Ok(());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DataflowError::external(
                "kafka-connect",
                format!("delete {name} returned {status}: {body}"),
            ));
        }
        info!("Deleted connector: {}", name);
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.connectors_url())
            .timeout(self.probe_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn connector_config(&self, name: &str) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}/{}/config", self.connectors_url(), name))
            .timeout(self.probe_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Cluster info from the root endpoint; doubles as the health probe.
    pub async fn info(&self) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| DataflowError::ConnectFailed(e.to_string()))?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}
