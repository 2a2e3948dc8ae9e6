//! Orphaned-topic maintenance
//!
//! Enumerates broker topics, categorizes them (system, connect-internal,
//! processor-internal, pipeline-owned, enriched), computes the orphan set -
//! pipeline-owned topics whose prefix no non-deleted pipeline references -
//! and prints (default) or deletes them. Nuclear mode deletes all
//! dataflow-prefixed topics regardless of the pipeline table.

use crate::common::output::{print_dry_run, print_error, print_info, print_success, print_warning};
use crate::database::Database;
use crate::infra::TopicManager;
use clap::Args;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Category of one broker topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopicCategory {
    System,
    ConnectInternal,
    ProcessorInternal,
    SchemaHistory,
    CdcRaw,
    FilteredStream,
    Enriched,
    Unknown,
}

/// Categorized topic with its extracted pipeline prefix, when owned.
#[derive(Debug, Clone, Serialize)]
pub struct CategorizedTopic {
    pub name: String,
    pub category: TopicCategory,
    pub prefix: Option<String>,
}

impl CategorizedTopic {
    pub fn is_system(&self) -> bool {
        matches!(
            self.category,
            TopicCategory::System | TopicCategory::ConnectInternal | TopicCategory::ProcessorInternal
        )
    }

    pub fn is_pipeline_owned(&self) -> bool {
        matches!(
            self.category,
            TopicCategory::SchemaHistory
                | TopicCategory::CdcRaw
                | TopicCategory::FilteredStream
                | TopicCategory::Enriched
        )
    }
}

fn dataflow_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(dataflow_[a-f0-9]+)").expect("static pattern"))
}

fn enriched_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(enriched_[a-f0-9]+)").expect("static pattern"))
}

/// Categorize one topic by name.
pub fn categorize_topic(topic: &str) -> CategorizedTopic {
    if topic.starts_with('_') || topic == "__consumer_offsets" || topic == "__transaction_state" {
        // `_confluent-ksql-` falls in here too, but gets its own bucket.
        if topic.starts_with("_confluent-ksql-") {
            return CategorizedTopic {
                name: topic.to_string(),
                category: TopicCategory::ProcessorInternal,
                prefix: None,
            };
        }
        return CategorizedTopic {
            name: topic.to_string(),
            category: TopicCategory::System,
            prefix: None,
        };
    }

    if topic.starts_with("connect-") || topic.starts_with("dataflow-connect") {
        return CategorizedTopic {
            name: topic.to_string(),
            category: TopicCategory::ConnectInternal,
            prefix: None,
        };
    }

    if topic.starts_with("dataflow_") {
        let prefix = dataflow_prefix_regex()
            .captures(topic)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        let category = if topic.contains(".schema-history") {
            TopicCategory::SchemaHistory
        } else if topic.contains("_filtered") {
            TopicCategory::FilteredStream
        } else if topic.contains("_enriched") {
            TopicCategory::Enriched
        } else {
            TopicCategory::CdcRaw
        };

        return CategorizedTopic {
            name: topic.to_string(),
            category,
            prefix,
        };
    }

    if topic.starts_with("enriched_") {
        let prefix = enriched_prefix_regex()
            .captures(topic)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        return CategorizedTopic {
            name: topic.to_string(),
            category: TopicCategory::Enriched,
            prefix,
        };
    }

    CategorizedTopic {
        name: topic.to_string(),
        category: TopicCategory::Unknown,
        prefix: None,
    }
}

/// Pipeline-owned topics whose prefix no active pipeline references.
/// System topics are never candidates.
pub fn find_orphans(topics: &[String], active_prefixes: &HashSet<String>) -> Vec<CategorizedTopic> {
    topics
        .iter()
        .map(|t| categorize_topic(t))
        .filter(|info| !info.is_system() && info.is_pipeline_owned())
        .filter(|info| match &info.prefix {
            Some(prefix) => !active_prefixes
                .iter()
                .any(|active| prefix == active || prefix.starts_with(active.as_str())),
            None => true,
        })
        .collect()
}

/// `topics sweep` command.
#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Actually delete orphaned topics (default is dry-run)
    #[arg(long)]
    pub execute: bool,

    /// Delete ALL dataflow-prefixed topics, ignoring the pipeline table
    #[arg(long)]
    pub nuclear: bool,

    /// Also list system/internal topics (never deleted)
    #[arg(long)]
    pub include_system: bool,
}

pub async fn sweep(
    args: &SweepArgs,
    topics: &TopicManager,
    database: &Database,
) -> anyhow::Result<()> {
    let all_topics = topics.list_topics(None).await?;
    print_info(&format!("Found {} total topics", all_topics.len()));

    let categorized: Vec<CategorizedTopic> =
        all_topics.iter().map(|t| categorize_topic(t)).collect();
    let owned = categorized.iter().filter(|t| t.is_pipeline_owned()).count();
    let system = categorized.iter().filter(|t| t.is_system()).count();
    print_info(&format!(
        "{} pipeline-owned topics, {} system/internal topics",
        owned, system
    ));

    if args.include_system {
        for topic in categorized.iter().filter(|t| t.is_system()) {
            println!("  [{:?}] {}", topic.category, topic.name);
        }
    }

    let orphans: Vec<CategorizedTopic> = if args.nuclear {
        print_warning("NUCLEAR mode: every dataflow-prefixed topic is a candidate");
        categorized
            .into_iter()
            .filter(|t| t.is_pipeline_owned())
            .collect()
    } else {
        let prefixes: HashSet<String> =
            database.active_topic_prefixes().await?.into_iter().collect();
        print_info(&format!("{} active pipeline prefixes", prefixes.len()));
        find_orphans(&all_topics, &prefixes)
    };

    if orphans.is_empty() {
        print_success("No orphaned topics found");
        return Ok(());
    }

    println!("\nOrphaned topics:");
    for orphan in &orphans {
        println!("  [{:?}] {}", orphan.category, orphan.name);
    }

    if !args.execute {
        print_dry_run(&format!(
            "{} topics would be deleted. Re-run with --execute to delete them.",
            orphans.len()
        ));
        return Ok(());
    }

    let names: Vec<String> = orphans.iter().map(|o| o.name.clone()).collect();
    let results = topics.delete_topics(&names).await?;

    let mut deleted = 0usize;
    for (topic, error) in results {
        match error {
            None => {
                deleted += 1;
                print_success(&format!("Deleted {topic}"));
            }
            Some(e) => print_error(&format!("Failed to delete {topic}: {e}")),
        }
    }
    print_success(&format!("Deleted {deleted} of {} orphaned topics", names.len()));

    Ok(())
}

/// Check orphan computation without touching a broker.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_system_topics() {
        assert!(categorize_topic("__consumer_offsets").is_system());
        assert!(categorize_topic("connect-configs").is_system());
        assert!(categorize_topic("_confluent-ksql-default_command_topic").is_system());
        assert_eq!(
            categorize_topic("_confluent-ksql-default_command_topic").category,
            TopicCategory::ProcessorInternal
        );
    }

    #[test]
    fn test_categorize_pipeline_topics() {
        let raw = categorize_topic("dataflow_aaa111.public.orders");
        assert_eq!(raw.category, TopicCategory::CdcRaw);
        assert_eq!(raw.prefix.as_deref(), Some("dataflow_aaa111"));

        let filtered = categorize_topic("dataflow_aaa111_filtered_public_orders");
        assert_eq!(filtered.category, TopicCategory::FilteredStream);

        let history = categorize_topic("dataflow_aaa111.schema-history");
        assert_eq!(history.category, TopicCategory::SchemaHistory);

        let enriched = categorize_topic("enriched_aaa111_logins");
        assert_eq!(enriched.category, TopicCategory::Enriched);
        assert_eq!(enriched.prefix.as_deref(), Some("enriched_aaa111"));
    }

    #[test]
    fn test_orphan_sweep_scenario() {
        // Spec scenario: AAA is active, BBB is not; system topics untouched.
        let topics = vec![
            "dataflow_aaa.public.t".to_string(),
            "dataflow_bbb.public.t".to_string(),
            "__consumer_offsets".to_string(),
            "connect-configs".to_string(),
        ];
        let active: HashSet<String> = ["dataflow_aaa".to_string()].into_iter().collect();

        let orphans = find_orphans(&topics, &active);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].name, "dataflow_bbb.public.t");
    }

    #[test]
    fn test_orphans_empty_when_all_active() {
        let topics = vec!["dataflow_aaa.public.t".to_string()];
        let active: HashSet<String> = ["dataflow_aaa".to_string()].into_iter().collect();
        assert!(find_orphans(&topics, &active).is_empty());
    }
}
