//! Dataflow Hub - operator CLI
//!
//! Maintenance and diagnostics for the CDC control plane: orphaned-topic
//! sweeps, external-system health probes, sink-schema verification, and
//! operator-initiated monitor checks.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use dataflow_hub::cli::topics::{sweep, SweepArgs};
use dataflow_hub::common::output::{print_error, print_success, print_warning};
use dataflow_hub::common::HubConfig;
use dataflow_hub::database::Database;
use dataflow_hub::discovery::SchemaDiscovery;
use dataflow_hub::infra::{
    ClickHouseClient, ConnectClient, Mailer, ProcessorClient, SchemaRegistryClient, TopicManager,
};
use dataflow_hub::modules::ModuleRegistry;
use dataflow_hub::monitor::{AlertDispatcher, MonitorLoop};
use dataflow_hub::pipeline::{EnrichmentService, PipelineOrchestrator, ResourceTracker};
use dataflow_hub::vault::CredentialVault;

#[derive(Parser)]
#[command(name = "dataflow-hub")]
#[command(about = "Dataflow Hub - CDC control-plane operations CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output in JSON format where supported
    #[arg(short, long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Broker topic maintenance
    Topics {
        #[command(subcommand)]
        command: TopicsCommand,
    },

    /// Probe the external systems the control plane depends on
    Health,

    /// Pipeline diagnostics
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommand,
    },

    /// Monitor operations
    Monitor {
        #[command(subcommand)]
        command: MonitorCommand,
    },
}

#[derive(Subcommand)]
enum TopicsCommand {
    /// Find (and optionally delete) orphaned pipeline topics
    Sweep(SweepArgs),
}

#[derive(Subcommand)]
enum PipelineCommand {
    /// Verify a pipeline's sink table against the discovered source schema
    VerifySink {
        /// Pipeline id
        #[arg(long)]
        pipeline: String,

        /// Fully qualified source table (schema.table)
        #[arg(long)]
        table: String,
    },
}

#[derive(Subcommand)]
enum MonitorCommand {
    /// Run one monitoring sweep now
    CheckNow {
        /// Limit to one pipeline
        #[arg(long)]
        pipeline: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    if !cli.json {
        println!("{}\n", "Dataflow Hub - Operations CLI".bold().cyan());
    }

    let config = HubConfig::load().context("Failed to load configuration")?;

    match cli.command {
        Commands::Topics { command } => match command {
            TopicsCommand::Sweep(args) => {
                let topics = TopicManager::new(&config.kafka)
                    .context("Failed to create Kafka admin client")?;
                let database = Database::new(&config.metadata)
                    .await
                    .context("Failed to connect to the metadata store")?;
                sweep(&args, &topics, &database).await?;
            }
        },
        Commands::Health => {
            let connect = ConnectClient::new(&config.connect)?;
            let processor = ProcessorClient::new(&config.processor)?;
            let clickhouse = ClickHouseClient::new(&config.clickhouse)?;
            let healthy =
                dataflow_hub::cli::health::check_all(&connect, &processor, &clickhouse, cli.json)
                    .await;
            if !healthy {
                std::process::exit(1);
            }
        }
        Commands::Pipeline { command } => match command {
            PipelineCommand::VerifySink { pipeline, table } => {
                let orchestrator = build_orchestrator(&config).await?;
                let result = orchestrator.verify_sink_table(&pipeline, &table).await?;

                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                } else if result.compatible {
                    print_success(&format!("Sink table for {table} matches the source schema"));
                } else {
                    if !result.exists {
                        print_error(&format!("Sink table for {table} does not exist"));
                    }
                    for missing in &result.missing_columns {
                        print_warning(&format!("Missing column: {missing}"));
                    }
                    for mismatch in &result.type_mismatches {
                        print_warning(&format!("Type mismatch: {mismatch}"));
                    }
                    if let Some(sql) = &result.create_table_sql {
                        println!("\nStatement to create it:\n{sql}");
                    }
                }
                if !result.compatible {
                    std::process::exit(1);
                }
            }
        },
        Commands::Monitor { command } => match command {
            MonitorCommand::CheckNow { pipeline } => {
                let database = Arc::new(
                    Database::new(&config.metadata)
                        .await
                        .context("Failed to connect to the metadata store")?,
                );
                let vault = Arc::new(CredentialVault::new(Arc::clone(&database), &config.vault));
                let mailer = Arc::new(Mailer::new(&config.smtp)?);
                let dispatcher =
                    Arc::new(AlertDispatcher::new(Arc::clone(&database), mailer));
                let monitor =
                    MonitorLoop::new(database, vault, dispatcher, config.monitor.clone());

                let summary = monitor.check_now(pipeline.as_deref()).await?;
                println!(
                    "Checked {} pipeline(s), {} anomaly alert(s) dispatched at {}",
                    summary.pipelines_checked, summary.anomalies_found, summary.checked_at
                );
            }
        },
    }

    Ok(())
}

/// Wire the full orchestrator from configuration.
async fn build_orchestrator(config: &HubConfig) -> Result<PipelineOrchestrator> {
    let database = Arc::new(
        Database::new(&config.metadata)
            .await
            .context("Failed to connect to the metadata store")?,
    );
    let vault = Arc::new(CredentialVault::new(Arc::clone(&database), &config.vault));
    let registry = Arc::new(RwLock::new(
        ModuleRegistry::load(&config.modules.config_dir)
            .context("Failed to load module descriptors")?,
    ));
    let connect = Arc::new(ConnectClient::new(&config.connect)?);
    let processor = Arc::new(ProcessorClient::new(&config.processor)?);
    let schema_registry = Arc::new(SchemaRegistryClient::new(&config.schema_registry)?);
    let topics = Arc::new(
        TopicManager::new(&config.kafka).context("Failed to create Kafka admin client")?,
    );
    let clickhouse = Arc::new(ClickHouseClient::new(&config.clickhouse)?);
    let tracker = Arc::new(ResourceTracker::new(Arc::clone(&database)));
    let discovery = Arc::new(SchemaDiscovery::new(
        Arc::clone(&database),
        Arc::clone(&vault),
    ));
    let enrichments = Arc::new(EnrichmentService::new(
        Arc::clone(&database),
        Arc::clone(&processor),
        Arc::clone(&tracker),
    ));

    Ok(PipelineOrchestrator::new(
        database,
        vault,
        registry,
        connect,
        processor,
        schema_registry,
        topics,
        clickhouse,
        tracker,
        discovery,
        enrichments,
        config.pricing.clone(),
    ))
}
