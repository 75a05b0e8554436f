//! NS1 client tests against a mock API.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use saltmaster::providers::ns1::Ns1;
use saltmaster::providers::{CreateRecordRequest, DnsProvider, ProviderError};

const RECORD_PATH: &str = "/zones/example.com/teleport.example.com/A";

fn request(answer: &str) -> CreateRecordRequest {
    CreateRecordRequest {
        zone: "example.com".to_string(),
        domain: "teleport.example.com".to_string(),
        record_type: "A".to_string(),
        answers: vec![answer.to_string()],
    }
}

fn record(answer: &str) -> serde_json::Value {
    json!({
        "id": "record-1",
        "zone": "example.com",
        "domain": "teleport.example.com",
        "type": "A",
        "answers": [{"answer": [answer]}]
    })
}

fn provider(server: &MockServer) -> Ns1 {
    Ns1::new("ns1-key").unwrap().with_base_url(server.uri())
}

#[tokio::test]
async fn test_missing_record_is_created_with_put() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RECORD_PATH))
        .and(header("X-NSONE-Key", "ns1-key"))
        .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"message":"record not found"}"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(RECORD_PATH))
        .and(body_partial_json(json!({
            "zone": "example.com",
            "domain": "teleport.example.com",
            "type": "A",
            "answers": [{"answer": ["147.75.1.2"]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(record("147.75.1.2")))
        .expect(1)
        .mount(&server)
        .await;

    let created = provider(&server)
        .upsert_record(request("147.75.1.2"))
        .await
        .unwrap();

    assert_eq!(created.id, "record-1");
    assert_eq!(created.answers, vec!["147.75.1.2"]);
}

#[tokio::test]
async fn test_stale_record_is_updated_with_post() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RECORD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(record("147.75.9.9")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(RECORD_PATH))
        .and(body_partial_json(json!({"answers": [{"answer": ["147.75.1.2"]}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(record("147.75.1.2")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let updated = provider(&server)
        .upsert_record(request("147.75.1.2"))
        .await
        .unwrap();

    assert_eq!(updated.answers, vec!["147.75.1.2"]);
}

#[tokio::test]
async fn test_matching_record_is_left_alone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RECORD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(record("147.75.1.2")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let existing = provider(&server)
        .upsert_record(request("147.75.1.2"))
        .await
        .unwrap();

    assert_eq!(existing.id, "record-1");
}

#[tokio::test]
async fn test_lookup_error_is_not_treated_as_missing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RECORD_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = provider(&server)
        .upsert_record(request("147.75.1.2"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Api { status: 401, .. }));
}
