//! Wire-contract tests for the stream-processor client: identifier quoting
//! in emitted DDL, earliest-offset property, and already-exists tolerance.

use dataflow_hub::common::config::ProcessorConfig;
use dataflow_hub::infra::ProcessorClient;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn client_for(server: &MockServer) -> ProcessorClient {
    ProcessorClient::new(&ProcessorConfig {
        url: server.uri(),
        timeout: 5,
        default_partitions: 3,
        default_replicas: 3,
    })
    .unwrap()
}

fn body_of(request: &Request) -> serde_json::Value {
    serde_json::from_slice(&request.body).unwrap()
}

#[tokio::test]
async fn test_filtered_stream_quotes_identifiers_and_reads_earliest() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/ksql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"commandId": "stream/FILTERED_ABC_ORDERS/create"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = client
        .create_filtered_stream(
            "stream_abc_orders",
            "filtered_abc_orders",
            "event_type IN ('login', 'logout')",
            None,
            Some("dataflow_abc_filtered_orders"),
        )
        .await
        .unwrap();

    assert!(outcome.created);
    assert_eq!(outcome.query_id.as_deref(), Some("stream/FILTERED_ABC_ORDERS/create"));

    let requests = server.received_requests().await.unwrap();
    let body = body_of(&requests[0]);
    let ksql = body["ksql"].as_str().unwrap();

    // Identifiers are backtick-quoted lowercase; literals survive verbatim.
    assert!(ksql.contains("`event_type` IN ('login', 'logout')"));
    assert!(ksql.contains("KAFKA_TOPIC='dataflow_abc_filtered_orders'"));
    assert!(ksql.contains("EMIT CHANGES"));
    // Historical rows are processed too.
    assert_eq!(
        body["streamsProperties"]["ksql.streams.auto.offset.reset"],
        "earliest"
    );
}

#[tokio::test]
async fn test_already_exists_is_not_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/ksql"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string(
                r#"{"message": "Cannot add stream FILTERED_X: A stream with the same name already exists"}"#,
            ),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = client
        .create_filtered_stream("src", "filtered_x", "a = 'b'", None, None)
        .await
        .unwrap();

    assert!(!outcome.created);
    assert!(outcome.already_exists);
}

#[tokio::test]
async fn test_schema_id_stream_omits_column_list() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/ksql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{}])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .create_stream("orders_stream", "dataflow_abc.public.orders", &[], "AVRO", Some(42))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let ksql = body_of(&requests[0])["ksql"].as_str().unwrap().to_string();
    assert!(ksql.contains("VALUE_SCHEMA_ID=42"));
    // No parenthesized column list before WITH.
    assert!(ksql.starts_with("CREATE STREAM ORDERS_STREAM WITH"));
}

#[tokio::test]
async fn test_windowed_aggregation_shape() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/ksql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{}])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .create_windowed_aggregation(
            "logins",
            "logins_per_hour",
            &["user_id".to_string()],
            &[dataflow_hub::infra::ksql::Aggregation {
                function: "count".to_string(),
                column: "*".to_string(),
                alias: "login_count".to_string(),
            }],
            "tumbling",
            "1 HOUR",
            None,
            None,
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let ksql = body_of(&requests[0])["ksql"].as_str().unwrap().to_string();
    assert!(ksql.contains("WINDOW TUMBLING (SIZE 1 HOUR)"));
    assert!(ksql.contains("COUNT(*) AS LOGIN_COUNT"));
    assert!(ksql.contains("GROUP BY USER_ID"));
    assert!(ksql.contains("WINDOWSTART AS WINDOW_START"));
}

#[tokio::test]
async fn test_predicate_guard_rejects_injection() {
    let server = MockServer::start().await;
    let client = client_for(&server);

    let err = client
        .create_filtered_stream("src", "out", "x = 'y'; DROP STREAM src", None, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("predicate"));

    // Nothing reached the server.
    assert!(server.received_requests().await.unwrap().is_empty());
}
