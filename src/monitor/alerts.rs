//! Alert rules and dispatch
//!
//! Enforces the rule schedule (enabled weekdays and hours, cooldown) before
//! rendering and delivering a notification, then records the attempt in the
//! alert history. Delivery failure is recorded, never propagated - a broken
//! SMTP relay must not take the monitor down.

use crate::database::Database;
use crate::errors::{DataflowError, Result};
use crate::infra::Mailer;
use crate::models::{AlertHistory, AlertRule, Anomaly, AnomalySeverity, RuleKind};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Request to create an alert rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub user_id: String,
    #[serde(default)]
    pub pipeline_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub rule_kind: RuleKind,
    pub threshold_config: serde_json::Value,
    /// 0 = Monday .. 6 = Sunday. Defaults to Friday only.
    #[serde(default)]
    pub enabled_days: Option<Vec<u8>>,
    #[serde(default)]
    pub enabled_hours: Option<Vec<u8>>,
    #[serde(default)]
    pub cooldown_minutes: Option<i64>,
    #[serde(default)]
    pub severity: Option<AnomalySeverity>,
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// Today's weekday in the rule's 0=Monday convention.
pub fn is_alert_day(enabled_days: &[u8], now: DateTime<Utc>) -> bool {
    let weekday = now.weekday().num_days_from_monday() as u8;
    enabled_days.contains(&weekday)
}

/// No hour restriction means always allowed.
pub fn is_alert_hour(enabled_hours: Option<&[u8]>, now: DateTime<Utc>) -> bool {
    match enabled_hours {
        None => true,
        Some(hours) if hours.is_empty() => true,
        Some(hours) => hours.contains(&(now.hour() as u8)),
    }
}

/// True when the cooldown has elapsed (or the rule never fired).
pub fn cooldown_elapsed(
    last_triggered_at: Option<DateTime<Utc>>,
    cooldown_minutes: i64,
    now: DateTime<Utc>,
) -> bool {
    match last_triggered_at {
        None => true,
        Some(last) => (now - last).num_seconds() >= cooldown_minutes * 60,
    }
}

/// Dispatches anomalies as e-mail alerts according to rule schedules.
pub struct AlertDispatcher {
    database: Arc<Database>,
    mailer: Arc<Mailer>,
}

impl AlertDispatcher {
    pub fn new(database: Arc<Database>, mailer: Arc<Mailer>) -> Self {
        Self { database, mailer }
    }

    /// Create a rule. Days default to Friday, cooldown to 30 minutes,
    /// severity to warning.
    #[instrument(skip(self, spec))]
    pub async fn create_rule(&self, spec: RuleSpec) -> Result<AlertRule> {
        if let Some(pipeline_id) = &spec.pipeline_id {
            let pipeline = self
                .database
                .get_pipeline(pipeline_id)
                .await?
                .ok_or_else(|| DataflowError::NotFound(format!("pipeline {pipeline_id}")))?;
            if pipeline.user_id != spec.user_id {
                return Err(DataflowError::NotFound(format!("pipeline {pipeline_id}")));
            }
        }

        let enabled_days = spec.enabled_days.unwrap_or_else(|| vec![4]);
        if enabled_days.iter().any(|d| *d > 6) {
            return Err(DataflowError::Validation(
                "enabled_days entries must be 0..=6 (Monday..Sunday)".to_string(),
            ));
        }
        if let Some(hours) = &spec.enabled_hours {
            if hours.iter().any(|h| *h > 23) {
                return Err(DataflowError::Validation(
                    "enabled_hours entries must be 0..=23".to_string(),
                ));
            }
        }

        let rule = AlertRule {
            id: Uuid::new_v4().to_string(),
            user_id: spec.user_id,
            pipeline_id: spec.pipeline_id,
            name: spec.name,
            description: spec.description,
            rule_kind: spec.rule_kind,
            threshold_config: spec.threshold_config,
            enabled_days,
            enabled_hours: spec.enabled_hours,
            cooldown_minutes: spec.cooldown_minutes.unwrap_or(30),
            severity: spec.severity.unwrap_or(AnomalySeverity::Warning),
            recipients: spec.recipients,
            is_active: true,
            last_triggered_at: None,
            trigger_count: 0,
            created_at: Utc::now(),
        };

        self.database.insert_alert_rule(&rule).await?;
        info!(
            "Created alert rule '{}' (kind={}, days={:?})",
            rule.name,
            rule.rule_kind.as_str(),
            rule.enabled_days
        );
        Ok(rule)
    }

    pub async fn get_rule(&self, user_id: &str, rule_id: &str) -> Result<AlertRule> {
        let rule = self
            .database
            .get_alert_rule(rule_id)
            .await?
            .ok_or_else(|| DataflowError::NotFound(format!("alert rule {rule_id}")))?;
        if rule.user_id != user_id {
            return Err(DataflowError::NotFound(format!("alert rule {rule_id}")));
        }
        Ok(rule)
    }

    pub async fn list_rules(
        &self,
        user_id: &str,
        pipeline_id: Option<&str>,
        active_only: bool,
    ) -> Result<Vec<AlertRule>> {
        self.database.list_alert_rules(user_id, pipeline_id, active_only).await
    }

    pub async fn update_rule(&self, rule: &AlertRule) -> Result<()> {
        self.database.update_alert_rule(rule).await
    }

    pub async fn delete_rule(&self, user_id: &str, rule_id: &str) -> Result<()> {
        if !self.database.delete_alert_rule(user_id, rule_id).await? {
            return Err(DataflowError::NotFound(format!("alert rule {rule_id}")));
        }
        Ok(())
    }

    /// Dispatch an anomaly through a rule.
    ///
    /// Returns None when the rule is inactive or the schedule gate
    /// (weekday, hour, cooldown) rejects the dispatch - in that case nothing
    /// is recorded and nothing is sent. When the gate passes, a history row
    /// is always written, whether or not delivery succeeded.
    #[instrument(skip(self, anomaly))]
    pub async fn send(
        &self,
        rule_id: &str,
        anomaly: &Anomaly,
        bypass_schedule: bool,
    ) -> Result<Option<AlertHistory>> {
        let rule = self
            .database
            .get_alert_rule(rule_id)
            .await?
            .ok_or_else(|| DataflowError::NotFound(format!("alert rule {rule_id}")))?;

        if !rule.is_active {
            info!("Skipping alert - rule '{}' is inactive", rule.name);
            return Ok(None);
        }

        let now = Utc::now();
        if !bypass_schedule {
            if !is_alert_day(&rule.enabled_days, now) {
                info!("Skipping alert '{}' - not an enabled day", rule.name);
                return Ok(None);
            }
            if !is_alert_hour(rule.enabled_hours.as_deref(), now) {
                info!("Skipping alert '{}' - not an enabled hour", rule.name);
                return Ok(None);
            }
            if !cooldown_elapsed(rule.last_triggered_at, rule.cooldown_minutes, now) {
                info!("Skipping alert '{}' - still in cooldown", rule.name);
                return Ok(None);
            }
        }

        let title = format!(
            "[{}] {}: {}",
            rule.severity.as_str().to_uppercase(),
            anomaly.kind,
            anomaly.message
        );
        let html_body = build_email_body(&rule, anomaly, now);
        let text_body = format!(
            "Dataflow alert\n\n{title}\n\nView the pipeline dashboard for details."
        );

        let mut history = AlertHistory {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            alert_kind: anomaly.kind.clone(),
            severity: rule.severity,
            title: title.clone(),
            body: html_body.clone(),
            details: Some(anomaly.details.clone()),
            email_sent: false,
            email_sent_at: None,
            email_recipients: rule.recipients.clone(),
            email_error: None,
            triggered_at: now,
        };

        if !rule.recipients.is_empty() {
            match self
                .mailer
                .send(&rule.recipients, &title, &html_body, &text_body)
                .await
            {
                Ok(()) => {
                    history.email_sent = true;
                    history.email_sent_at = Some(Utc::now());
                }
                Err(e) => {
                    warn!("Alert e-mail failed: {}", e);
                    history.email_error = Some(e.to_string());
                }
            }
        }

        self.database.record_alert(&history).await?;
        info!(
            "Alert '{}' dispatched (sent={}, recipients={})",
            rule.name,
            history.email_sent,
            history.email_recipients.len()
        );
        Ok(Some(history))
    }

    /// Send a synthetic alert regardless of schedule.
    pub async fn test_rule(&self, user_id: &str, rule_id: &str) -> Result<AlertHistory> {
        let rule = self.get_rule(user_id, rule_id).await?;

        let anomaly = Anomaly {
            kind: rule.rule_kind.as_str().to_string(),
            severity: rule.severity,
            column: None,
            message: format!("Test alert for rule \"{}\"", rule.name),
            details: serde_json::json!({
                "test": true,
                "threshold_config": rule.threshold_config,
            }),
            pipeline_id: rule.pipeline_id.clone(),
            pipeline_name: None,
        };

        self.send(rule_id, &anomaly, true)
            .await?
            .ok_or_else(|| DataflowError::Integrity("test alert was not dispatched".to_string()))
    }

    pub async fn history(
        &self,
        user_id: &str,
        rule_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AlertHistory>> {
        self.database.list_alert_history(user_id, rule_id, limit).await
    }
}

fn build_email_body(rule: &AlertRule, anomaly: &Anomaly, now: DateTime<Utc>) -> String {
    let severity_color = match rule.severity {
        AnomalySeverity::Critical | AnomalySeverity::Error => "#dc3545",
        AnomalySeverity::Warning => "#ffc107",
        AnomalySeverity::Info => "#17a2b8",
    };

    let mut details_html = String::new();
    if let Some(object) = anomaly.details.as_object() {
        if !object.is_empty() {
            details_html.push_str("<h3>Details</h3><ul>");
            for (key, value) in object {
                details_html.push_str(&format!("<li><strong>{key}:</strong> {value}</li>"));
            }
            details_html.push_str("</ul>");
        }
    }

    format!(
        r#"<html>
<body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
    <div style="background: #f8f9fa; padding: 20px; border-radius: 8px;">
        <h2 style="color: #dc3545; margin-top: 0;">Dataflow Alert: {kind}</h2>
        <div style="background: white; padding: 15px; border-radius: 4px; margin: 15px 0;">
            <p><strong>Rule:</strong> {rule_name}</p>
            <p><strong>Type:</strong> {rule_kind}</p>
            <p><strong>Severity:</strong> <span style="color: {severity_color};">{severity}</span></p>
            <p><strong>Message:</strong> {message}</p>
        </div>
        {details_html}
        <p style="color: #6c757d; font-size: 12px; margin-top: 20px;">
            This alert was sent by Dataflow Hub at {timestamp} UTC
        </p>
    </div>
</body>
</html>"#,
        kind = anomaly.kind,
        rule_name = rule.name,
        rule_kind = rule.rule_kind.as_str(),
        severity = rule.severity.as_str().to_uppercase(),
        severity_color = severity_color,
        message = anomaly.message,
        details_html = details_html,
        timestamp = now.format("%Y-%m-%d %H:%M:%S"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_alert_day_gate() {
        // 2026-07-31 is a Friday (weekday 4).
        let friday = Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();
        assert!(is_alert_day(&[4], friday));
        assert!(!is_alert_day(&[0, 1, 2], friday));

        let saturday = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        assert!(is_alert_day(&[5], saturday));
        assert!(!is_alert_day(&[4], saturday));
    }

    #[test]
    fn test_alert_hour_gate() {
        let noon = Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();
        assert!(is_alert_hour(None, noon));
        assert!(is_alert_hour(Some(&[]), noon));
        assert!(is_alert_hour(Some(&[11, 12, 13]), noon));
        assert!(!is_alert_hour(Some(&[9, 10]), noon));
    }

    #[test]
    fn test_cooldown_gate() {
        let now = Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();
        assert!(cooldown_elapsed(None, 30, now));

        let recently = now - chrono::Duration::minutes(29);
        assert!(!cooldown_elapsed(Some(recently), 30, now));

        let long_ago = now - chrono::Duration::minutes(30);
        assert!(cooldown_elapsed(Some(long_ago), 30, now));
    }

    #[test]
    fn test_email_body_contains_rule_and_anomaly() {
        let rule = AlertRule {
            id: "r1".to_string(),
            user_id: "u1".to_string(),
            pipeline_id: None,
            name: "orders gap".to_string(),
            description: None,
            rule_kind: RuleKind::GapDetection,
            threshold_config: serde_json::json!({"minutes": 5}),
            enabled_days: vec![4],
            enabled_hours: None,
            cooldown_minutes: 30,
            severity: AnomalySeverity::Warning,
            recipients: vec!["ops@example.com".to_string()],
            is_active: true,
            last_triggered_at: None,
            trigger_count: 0,
            created_at: Utc::now(),
        };
        let anomaly = Anomaly {
            kind: "gap_detection".to_string(),
            severity: AnomalySeverity::Warning,
            column: None,
            message: "no events for 6.0 minutes".to_string(),
            details: serde_json::json!({"gap_minutes": 6.0}),
            pipeline_id: None,
            pipeline_name: None,
        };

        let body = build_email_body(&rule, &anomaly, Utc::now());
        assert!(body.contains("orders gap"));
        assert!(body.contains("gap_detection"));
        assert!(body.contains("no events for 6.0 minutes"));
        assert!(body.contains("gap_minutes"));
    }
}
