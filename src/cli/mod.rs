//! Operator CLI command implementations
//!
//! - topics: broker-topic maintenance (orphan sweep)
//! - health: external-system probes

pub mod health;
pub mod topics;

pub use topics::{categorize_topic, find_orphans, CategorizedTopic, SweepArgs, TopicCategory};
