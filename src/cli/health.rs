//! External-system health checks

use crate::common::output::{print_error, print_success, CommandOutput};
use crate::infra::{ClickHouseClient, ConnectClient, ProcessorClient};

/// Probe Connect, the stream processor, and ClickHouse; returns false when
/// any probe failed. With `json` set, one machine-readable summary goes to
/// stdout instead of per-probe lines.
pub async fn check_all(
    connect: &ConnectClient,
    processor: &ProcessorClient,
    clickhouse: &ClickHouseClient,
    json: bool,
) -> bool {
    let mut probes = serde_json::Map::new();
    let mut errors = Vec::new();

    match connect.info().await {
        Ok(info) => {
            let version = info
                .get("version")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            if !json {
                print_success(&format!("Kafka Connect reachable (version {version})"));
            }
            probes.insert("kafka_connect".to_string(), serde_json::json!({"version": version}));
        }
        Err(e) => {
            if !json {
                print_error(&format!("Kafka Connect unreachable: {e}"));
            }
            errors.push(format!("kafka-connect: {e}"));
        }
    }

    match processor.info().await {
        Ok(info) => {
            let version = info
                .get("KsqlServerInfo")
                .and_then(|i| i.get("version"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            if !json {
                print_success(&format!("Stream processor reachable (version {version})"));
            }
            probes.insert("processor".to_string(), serde_json::json!({"version": version}));
        }
        Err(e) => {
            if !json {
                print_error(&format!("Stream processor unreachable: {e}"));
            }
            errors.push(format!("stream-processor: {e}"));
        }
    }

    match clickhouse.test_connection().await {
        Ok(version) => {
            if !json {
                print_success(&format!("ClickHouse reachable (version {version})"));
            }
            probes.insert("clickhouse".to_string(), serde_json::json!({"version": version}));
        }
        Err(e) => {
            if !json {
                print_error(&format!("ClickHouse unreachable: {e}"));
            }
            errors.push(format!("clickhouse: {e}"));
        }
    }

    let healthy = errors.is_empty();
    if json {
        let output = if healthy {
            CommandOutput::success_with_data("all probes passed", serde_json::Value::Object(probes))
        } else {
            CommandOutput::failure("one or more probes failed", errors)
        };
        output.output_json();
    }

    healthy
}
