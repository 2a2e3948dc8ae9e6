//! Pipeline orchestration: the state machine, the resource ledger, and
//! enrichment lifecycle

pub mod enrichment;
pub mod orchestrator;
pub mod tracker;

pub use enrichment::{EnrichmentService, EnrichmentSpec};
pub use orchestrator::{
    sink_topic_for_table, DeleteOptions, DeleteReport, PipelineOrchestrator, ResourceNames,
};
pub use tracker::{order_for_deletion, ResourceTracker};
