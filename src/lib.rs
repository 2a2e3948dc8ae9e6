//! Dataflow Hub
//!
//! Control plane for change-data-capture pipelines. Users describe a desired
//! dataflow; the hub provisions and supervises the infrastructure - a CDC
//! source connector, stream-processor transformations, a ClickHouse sink -
//! tracks every artifact it creates so a pipeline can be fully reclaimed,
//! and monitors running pipelines for anomalies with e-mail alerting.
//!
//! # Overview
//!
//! - **modules**: declarative source/sink/transform descriptors
//! - **vault**: AES-256-GCM sealed source credentials
//! - **discovery**: source-schema introspection and CDC readiness probing
//! - **planner**: natural-language filters, stream-table joins, cost
//!   projection
//! - **infra**: clients for Kafka Connect, the stream processor, the schema
//!   registry, broker admin, ClickHouse, and SMTP
//! - **pipeline**: the orchestrator state machine, the resource tracker, and
//!   enrichments
//! - **monitor**: the anomaly engine, alert dispatch, and the background
//!   monitoring loop
//! - **conversation**: requirement extraction and the stepwise workflow
//!   cursor

pub mod cli;
pub mod common;
pub mod conversation;
pub mod database;
pub mod discovery;
pub mod errors;
pub mod infra;
pub mod models;
pub mod modules;
pub mod monitor;
pub mod pipeline;
pub mod planner;
pub mod vault;

// Re-export commonly used types at the crate root
pub use common::HubConfig;
pub use database::Database;
pub use errors::{DataflowError, Result};
pub use models::{Pipeline, PipelineSpec, PipelineStatus};
pub use monitor::{AlertDispatcher, AnomalyEngine, MonitorLoop};
pub use pipeline::{PipelineOrchestrator, ResourceTracker};
pub use vault::CredentialVault;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert!(!VERSION.is_empty());
    }
}
