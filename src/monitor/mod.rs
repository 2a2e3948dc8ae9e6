//! Background pipeline monitoring
//!
//! One long-lived task wakes on a fixed interval, pulls per-table metrics
//! straight from each running pipeline's source database, evaluates the
//! anomaly rules in scope, and hands matching anomalies to the alert
//! dispatcher. A failure on one pipeline is logged and skipped; the loop
//! outlives every per-pipeline error.

pub mod alerts;
pub mod anomaly;
pub mod health;

pub use alerts::{AlertDispatcher, RuleSpec};
pub use anomaly::{AnalysisThresholds, AnalysisVerdict, AnomalyEngine, RowSet, TransformKind};
pub use health::{HealthMonitor, HealthStatus, PipelineHealth};

use crate::common::config::MonitorConfig;
use crate::database::Database;
use crate::discovery::connect_source;
use crate::errors::Result;
use crate::models::{AlertRule, Anomaly, Pipeline, PipelineStatus, RuleKind};
use crate::vault::CredentialVault;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sqlx::Row;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// Metrics gathered for one pipeline in one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineMetrics {
    pub event_count: i64,
    pub last_event_time: Option<DateTime<Utc>>,
    pub tables: Vec<TableMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableMetrics {
    pub table: String,
    pub count: i64,
    pub last_event_time: Option<DateTime<Utc>>,
}

/// Summary of one `check_now` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct CheckSummary {
    pub pipelines_checked: usize,
    pub anomalies_found: usize,
    pub checked_at: DateTime<Utc>,
}

/// The background monitor task and its caches.
pub struct MonitorLoop {
    database: Arc<Database>,
    vault: Arc<CredentialVault>,
    dispatcher: Arc<AlertDispatcher>,
    engine: AnomalyEngine,
    config: MonitorConfig,
    /// Per-pipeline recent event counts; written only by this loop.
    count_history: DashMap<String, Vec<i64>>,
    running: AtomicBool,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl MonitorLoop {
    pub fn new(
        database: Arc<Database>,
        vault: Arc<CredentialVault>,
        dispatcher: Arc<AlertDispatcher>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            database,
            vault,
            dispatcher,
            engine: AnomalyEngine::new(),
            config,
            count_history: DashMap::new(),
            running: AtomicBool::new(false),
        handle: parking_lot::Mutex::new(None),
        }
    }

    /// Start the background loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Monitor already running");
            return;
        }

        let monitor = Arc::clone(self);
        let interval = Duration::from_secs(self.config.interval_seconds);
        let handle = tokio::spawn(async move {
            info!(
                "Started background monitoring (interval: {}s)",
                monitor.config.interval_seconds
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !monitor.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = monitor.sweep(None).await {
                    error!("Monitoring sweep failed: {}", e);
                }
            }
            info!("Monitor loop exited");
        });

        *self.handle.lock() = Some(handle);
    }

    /// Stop the loop and clear its caches.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
        self.count_history.clear();
        info!("Stopped background monitoring");
    }

    /// Operator-initiated synchronous check of one or all running pipelines.
    pub async fn check_now(&self, pipeline_id: Option<&str>) -> Result<CheckSummary> {
        self.sweep(pipeline_id).await
    }

    async fn sweep(&self, only_pipeline: Option<&str>) -> Result<CheckSummary> {
        let pipelines = match only_pipeline {
            Some(id) => match self.database.get_pipeline(id).await? {
                Some(p) => vec![p],
                None => vec![],
            },
            None => {
                self.database
                    .list_pipelines_with_status(PipelineStatus::Running)
                    .await?
            }
        };

        let mut anomalies_found = 0usize;
        for pipeline in &pipelines {
            let budget = Duration::from_secs(self.config.per_pipeline_timeout);
            match tokio::time::timeout(budget, self.check_pipeline(pipeline)).await {
                Ok(Ok(count)) => anomalies_found += count,
                Ok(Err(e)) => {
                    // Per-pipeline failures never stop the sweep.
                    warn!("Monitor check failed for pipeline {}: {}", pipeline.id, e);
                }
                Err(_) => {
                    warn!(
                        "Monitor check for pipeline {} timed out after {:?}",
                        pipeline.id, budget
                    );
                }
            }
        }

        Ok(CheckSummary {
            pipelines_checked: pipelines.len(),
            anomalies_found,
            checked_at: Utc::now(),
        })
    }

    #[instrument(skip(self, pipeline), fields(pipeline_id = %pipeline.id))]
    async fn check_pipeline(&self, pipeline: &Pipeline) -> Result<usize> {
        let rules = self
            .database
            .rules_for_pipeline(&pipeline.id, &pipeline.user_id)
            .await?;
        if rules.is_empty() {
            return Ok(0);
        }

        let Some(metrics) = self.gather_metrics(pipeline).await? else {
            return Ok(0);
        };

        // Volume baselines: append this sweep's count, bounded window.
        let history = {
            let mut entry = self.count_history.entry(pipeline.id.clone()).or_default();
            entry.push(metrics.event_count);
            let len = entry.len();
            if len > anomaly::BASELINE_WINDOW {
                entry.drain(..len - anomaly::BASELINE_WINDOW);
            }
            entry.clone()
        };

        let mut dispatched = 0usize;
        for rule in &rules {
            if let Some(mut anomaly) = self.evaluate_rule(rule, &metrics, &history) {
                anomaly.pipeline_id = Some(pipeline.id.clone());
                anomaly.pipeline_name = Some(pipeline.name.clone());

                match self.dispatcher.send(&rule.id, &anomaly, false).await {
                    Ok(Some(_)) => {
                        dispatched += 1;
                        info!(
                            "Alert sent for pipeline {}: {}",
                            pipeline.name, anomaly.kind
                        );
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Failed to send alert: {}", e),
                }
            }
        }

        // Observation only: the monitor touches the health cache, never the
        // pipeline status.
        self.database
            .update_health(&pipeline.id, &serde_json::to_value(&metrics)?)
            .await?;

        Ok(dispatched)
    }

    fn evaluate_rule(
        &self,
        rule: &AlertRule,
        metrics: &PipelineMetrics,
        history: &[i64],
    ) -> Option<Anomaly> {
        match rule.rule_kind {
            RuleKind::GapDetection => {
                let last = metrics.last_event_time?;
                let threshold = rule.threshold_i64("minutes", 5);
                self.engine.detect_gap(last, threshold, Utc::now())
            }
            RuleKind::VolumeSpike => {
                let baseline = AnomalyEngine::baseline(history)?;
                let threshold = rule.threshold_f64("multiplier", 3.0);
                self.engine
                    .detect_volume_spike(metrics.event_count, baseline, threshold)
            }
            RuleKind::VolumeDrop => {
                let baseline = AnomalyEngine::baseline(history)?;
                let threshold = rule.threshold_f64("threshold", 0.2);
                self.engine
                    .detect_volume_drop(metrics.event_count, baseline, threshold)
            }
            // Null-ratio rules need per-column statistics, which the quick
            // source sweep does not collect; they fire through the
            // preview/analyze path instead.
            RuleKind::NullRatio => None,
        }
    }

    /// Count recent rows and the max timestamp over the trailing window for
    /// each source table, straight from the source database.
    async fn gather_metrics(&self, pipeline: &Pipeline) -> Result<Option<PipelineMetrics>> {
        let secret = match self
            .vault
            .open(&pipeline.user_id, &pipeline.source_credential_id)
            .await
        {
            Ok(secret) => secret,
            Err(e) => {
                warn!("Cannot open credential for pipeline {}: {}", pipeline.id, e);
                return Ok(None);
            }
        };

        let mut conn = match connect_source(&secret).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Cannot reach source for pipeline {}: {}", pipeline.id, e);
                return Ok(None);
            }
        };

        let mut metrics = PipelineMetrics::default();
        for table in &pipeline.source_tables {
            let sql = format!(
                "SELECT COUNT(*) AS cnt, MAX(created_at) AS last_event FROM {table} WHERE created_at > NOW() - make_interval(mins => $1)"
            );
            match sqlx::query(&sql)
                .bind(self.config.metric_window_minutes as i32)
                .fetch_one(&mut conn)
                .await
            {
                Ok(row) => {
                    let count: i64 = row.try_get("cnt").unwrap_or(0);
                    let last: Option<DateTime<Utc>> = row.try_get("last_event").ok().flatten();

                    metrics.event_count += count;
                    if let Some(last) = last {
                        if metrics.last_event_time.map(|t| last > t).unwrap_or(true) {
                            metrics.last_event_time = Some(last);
                        }
                    }
                    metrics.tables.push(TableMetrics {
                        table: table.clone(),
                        count,
                        last_event_time: last,
                    });
                }
                Err(e) => {
                    // Tables without a created_at column are expected; note
                    // and move on.
                    warn!("Could not query {}: {}", table, e);
                }
            }
        }

        Ok(Some(metrics))
    }
}
