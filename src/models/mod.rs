//! Domain entities persisted by the metadata store

pub mod alert;
pub mod credential;
pub mod enrichment;
pub mod pipeline;
pub mod resource;
pub mod schema;
pub mod template;

pub use alert::{AlertHistory, AlertRule, Anomaly, AnomalySeverity, RuleKind};
pub use credential::{Credential, SourceSecret};
pub use enrichment::{Enrichment, EnrichmentStatus, JoinKey, JoinType, LookupTable};
pub use pipeline::{Pipeline, PipelineEvent, PipelineEventKind, PipelineSpec, PipelineStatus};
pub use resource::{ResourceKind, ResourceStatus, TrackedResource};
pub use schema::{ColumnInfo, DiscoveredTable, ForeignKey, RelationshipGraph};
pub use template::TransformTemplate;
