//! Management-API transport tests against a mock broker

use qs_broker::{BrokerClient, BrokerError};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn reads_message_count_for_vhost_and_queue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/queues/staging/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "jobs",
            "vhost": "staging",
            "messages": 42,
            "messages_ready": 40,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = BrokerClient::new(format!("{}/staging", server.uri())).unwrap();
    assert_eq!(client.queue_length("jobs").await.unwrap(), 42);
}

#[tokio::test]
async fn sends_userinfo_as_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/queues/vh/work"))
        // guest:guest
        .and(header("authorization", "Basic Z3Vlc3Q6Z3Vlc3Q="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messages": 7})))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri().replace("http://", "http://guest:guest@");
    let client = BrokerClient::new(format!("{uri}/vh")).unwrap();
    assert_eq!(client.queue_length("work").await.unwrap(), 7);
}

#[tokio::test]
async fn surfaces_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/queues/vh/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = BrokerClient::new(format!("{}/vh", server.uri())).unwrap();
    let err = client.queue_length("missing").await.unwrap_err();
    assert!(matches!(err, BrokerError::Http(_)));
}
