//! Pipeline health aggregation
//!
//! Folds connector states and recent error events into one health verdict
//! and caches it on the pipeline row. The monitor never mutates pipeline
//! status; health is an observation, not a transition.

use crate::database::Database;
use crate::errors::{DataflowError, Result};
use crate::infra::ConnectClient;
use crate::models::{PipelineEventKind, PipelineStatus};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Paused,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentError {
    pub component: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineHealth {
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub status: HealthStatus,
    pub source_connector: Option<serde_json::Value>,
    pub sink_connector: Option<serde_json::Value>,
    pub errors: Vec<ComponentError>,
    pub checked_at: chrono::DateTime<Utc>,
}

/// Aggregates pipeline health from connector states and the event journal.
pub struct HealthMonitor {
    database: Arc<Database>,
    connect: Arc<ConnectClient>,
}

impl HealthMonitor {
    pub fn new(database: Arc<Database>, connect: Arc<ConnectClient>) -> Self {
        Self { database, connect }
    }

    #[instrument(skip(self))]
    pub async fn pipeline_health(&self, pipeline_id: &str) -> Result<PipelineHealth> {
        let pipeline = self
            .database
            .get_pipeline(pipeline_id)
            .await?
            .ok_or_else(|| DataflowError::NotFound(format!("pipeline {pipeline_id}")))?;

        let mut status = HealthStatus::Healthy;
        let mut errors = Vec::new();

        let source_status = match &pipeline.source_connector_name {
            Some(name) => Some((name.clone(), self.connect.status(name).await)),
            None => None,
        };
        let source_connector = match source_status {
            Some((_, Ok(value))) => {
                match connector_state(&value) {
                    "FAILED" => {
                        status = HealthStatus::Failed;
                        errors.push(ComponentError {
                            component: "source_connector".to_string(),
                            message: connector_trace(&value),
                        });
                    }
                    "PAUSED" => status = HealthStatus::Paused,
                    _ => {}
                }
                Some(value)
            }
            Some((name, Err(e))) => {
                errors.push(ComponentError {
                    component: "source_connector".to_string(),
                    message: format!("Failed to get status of {name}: {e}"),
                });
                status = HealthStatus::Degraded;
                None
            }
            None => None,
        };

        let sink_status = match &pipeline.sink_connector_name {
            Some(name) => Some((name.clone(), self.connect.status(name).await)),
            None => None,
        };
        let sink_connector = match sink_status {
            Some((_, Ok(value))) => {
                if connector_state(&value) == "FAILED" {
                    status = HealthStatus::Failed;
                    errors.push(ComponentError {
                        component: "sink_connector".to_string(),
                        message: connector_trace(&value),
                    });
                }
                Some(value)
            }
            Some((name, Err(e))) => {
                errors.push(ComponentError {
                    component: "sink_connector".to_string(),
                    message: format!("Failed to get status of {name}: {e}"),
                });
                if status == HealthStatus::Healthy {
                    status = HealthStatus::Degraded;
                }
                None
            }
            None => None,
        };

        // Recent journalled errors degrade an otherwise healthy verdict.
        for event in self.database.list_pipeline_events(pipeline_id, 10).await? {
            if event.kind == PipelineEventKind::Error {
                if status == HealthStatus::Healthy {
                    status = HealthStatus::Degraded;
                }
                errors.push(ComponentError {
                    component: "pipeline".to_string(),
                    message: event.message,
                });
            }
        }

        if pipeline.status == PipelineStatus::Stopped {
            status = HealthStatus::Stopped;
        }

        let health = PipelineHealth {
            pipeline_id: pipeline_id.to_string(),
            pipeline_name: pipeline.name,
            status,
            source_connector,
            sink_connector,
            errors,
            checked_at: Utc::now(),
        };

        self.database
            .update_health(pipeline_id, &serde_json::to_value(&health)?)
            .await?;

        Ok(health)
    }
}

fn connector_state(status: &serde_json::Value) -> &str {
    status
        .get("connector")
        .and_then(|c| c.get("state"))
        .and_then(|s| s.as_str())
        .unwrap_or("UNKNOWN")
}

fn connector_trace(status: &serde_json::Value) -> String {
    status
        .get("connector")
        .and_then(|c| c.get("trace"))
        .and_then(|t| t.as_str())
        .unwrap_or("connector failed")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_state_extraction() {
        let status = serde_json::json!({"connector": {"state": "RUNNING"}});
        assert_eq!(connector_state(&status), "RUNNING");
        assert_eq!(connector_state(&serde_json::json!({})), "UNKNOWN");
    }

    #[test]
    fn test_connector_trace_fallback() {
        let status = serde_json::json!({"connector": {"state": "FAILED", "trace": "boom"}});
        assert_eq!(connector_trace(&status), "boom");
        assert_eq!(connector_trace(&serde_json::json!({})), "connector failed");
    }
}
