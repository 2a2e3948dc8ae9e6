//! Wire-contract tests for the Kafka Connect client

use dataflow_hub::common::config::ConnectConfig;
use dataflow_hub::errors::DataflowError;
use dataflow_hub::infra::ConnectClient;
use std::collections::BTreeMap;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ConnectClient {
    ConnectClient::new(&ConnectConfig {
        url: server.uri(),
        provision_timeout: 5,
        probe_timeout: 2,
    })
    .unwrap()
}

fn sample_config() -> BTreeMap<String, String> {
    [
        (
            "connector.class".to_string(),
            "io.debezium.connector.postgresql.PostgresConnector".to_string(),
        ),
        ("database.hostname".to_string(), "db.example".to_string()),
        ("topic.prefix".to_string(), "dataflow_abc123".to_string()),
    ]
    .into_iter()
    .collect()
}

#[tokio::test]
async fn test_create_connector_posts_name_and_config() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/connectors"))
        .and(body_partial_json(serde_json::json!({
            "name": "dataflow-pg-abc123",
            "config": {"topic.prefix": "dataflow_abc123"},
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "name": "dataflow-pg-abc123",
            "config": {},
            "tasks": [],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let created = client
        .create_connector("dataflow-pg-abc123", &sample_config())
        .await
        .unwrap();
    assert_eq!(created["name"], "dataflow-pg-abc123");
}

#[tokio::test]
async fn test_create_connector_surfaces_error_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/connectors"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("Connector configuration is invalid"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .create_connector("broken", &sample_config())
        .await
        .unwrap_err();
    match err {
        DataflowError::ExternalService { detail, .. } => {
            assert!(detail.contains("Connector configuration is invalid"));
        }
        other => panic!("expected ExternalService, got {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_404_is_success() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/connectors/already-gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.delete("already-gone").await.is_ok());
}

#[tokio::test]
async fn test_status_404_reports_not_found_state() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/connectors/missing/status"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let status = client.status("missing").await.unwrap();
    assert_eq!(status["connector"]["state"], "NOT_FOUND");
}

#[tokio::test]
async fn test_pause_and_resume_round_trip() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/connectors/c1/pause"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/connectors/c1/resume"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.pause("c1").await.unwrap();
    client.resume("c1").await.unwrap();
}
