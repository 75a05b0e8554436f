//! Equinix Metal client tests against a mock API.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use saltmaster::config::{BillingCycle, Facility, OperatingSystem, Plan};
use saltmaster::providers::equinix::EquinixMetal;
use saltmaster::providers::{
    AttachAddressRequest, CreateInstanceRequest, MetalProvider, ProviderError,
    ReserveAddressRequest,
};

const PROJECT: &str = "3a8a1c6e-0000-4000-8000-000000000001";

fn provider(server: &MockServer) -> EquinixMetal {
    EquinixMetal::new("metal-token", PROJECT)
        .unwrap()
        .with_base_url(server.uri())
        .with_poll_interval(Duration::from_millis(10))
        .with_provision_timeout(5)
}

fn device(state: &str) -> serde_json::Value {
    json!({
        "id": "dev-1",
        "hostname": "production-salt-master",
        "state": state,
        "ip_addresses": [
            {"id": "m", "address": "139.178.0.10", "network": "139.178.0.10", "cidr": 31,
             "address_family": 4, "public": true, "management": true}
        ]
    })
}

fn create_request() -> CreateInstanceRequest {
    CreateInstanceRequest {
        hostname: "production-salt-master".to_string(),
        plan: Plan::C3SmallX86,
        facilities: vec![Facility::Am6],
        operating_system: OperatingSystem::Ubuntu2004,
        tags: vec!["role:salt-master".to_string()],
        billing_cycle: BillingCycle::Hourly,
        user_data: "#!/bin/bash\necho hi\n".to_string(),
    }
}

#[tokio::test]
async fn test_reserve_address() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}/ips")))
        .and(header("X-Auth-Token", "metal-token"))
        .and(body_partial_json(json!({
            "type": "public_ipv4",
            "quantity": 1,
            "facility": "am6"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "reservation-1",
            "address": "147.75.1.2",
            "network": "147.75.1.2",
            "cidr": 32,
            "facility": {"code": "am6"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let address = provider(&server)
        .reserve_address(ReserveAddressRequest {
            facility: Facility::Am6,
            quantity: 1,
        })
        .await
        .unwrap();

    assert_eq!(address.id, "reservation-1");
    assert_eq!(address.address, "147.75.1.2");
    assert_eq!(address.cidr_notation, "147.75.1.2/32");
    assert_eq!(address.facility, "am6");
}

#[tokio::test]
async fn test_create_instance_returns_before_active() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}/devices")))
        .and(body_partial_json(json!({
            "hostname": "production-salt-master",
            "plan": "c3.small.x86",
            "facility": ["am6"],
            "operating_system": "ubuntu_20_04",
            "billing_cycle": "hourly",
            "tags": ["role:salt-master"]
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(device("queued")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device("active")))
        .expect(0)
        .mount(&server)
        .await;

    let instance = provider(&server)
        .create_instance(create_request())
        .await
        .unwrap();

    assert_eq!(instance.id, "dev-1");
    assert_eq!(instance.state, "queued");
    assert!(!instance.is_active());
}

#[tokio::test]
async fn test_wait_active_polls_until_active() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/devices/dev-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device("provisioning")))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/dev-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device("active")))
        .with_priority(2)
        .mount(&server)
        .await;

    let instance = provider(&server).wait_active("dev-1").await.unwrap();

    assert_eq!(instance.id, "dev-1");
    assert_eq!(instance.state, "active");
    assert_eq!(instance.public_ipv4.as_deref(), Some("139.178.0.10"));
}

#[tokio::test]
async fn test_wait_active_retries_transient_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/devices/dev-1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/dev-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device("active")))
        .with_priority(2)
        .mount(&server)
        .await;

    let instance = provider(&server).wait_active("dev-1").await.unwrap();

    assert_eq!(instance.state, "active");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_wait_active_gives_up_on_persistent_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/devices/dev-1"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let err = provider(&server).wait_active("dev-1").await.unwrap_err();

    assert!(matches!(err, ProviderError::Api { status: 500, .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_wait_active_does_not_retry_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/devices/dev-1"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let err = provider(&server).wait_active("dev-1").await.unwrap_err();

    assert!(matches!(err, ProviderError::Api { status: 403, .. }));
}

#[tokio::test]
async fn test_failed_device_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/devices/dev-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device("failed")))
        .mount(&server)
        .await;

    let err = provider(&server).wait_active("dev-1").await.unwrap_err();

    assert!(matches!(err, ProviderError::ResourceFailed(_)));
}

#[tokio::test]
async fn test_attach_address() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/devices/dev-1/ips"))
        .and(body_partial_json(json!({"address": "147.75.1.2/32"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "assignment-1",
            "address": "147.75.1.2",
            "network": "147.75.1.2",
            "cidr": 32,
            "assigned_to": {"href": "/metal/v1/devices/dev-1"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let attachment = provider(&server)
        .attach_address(AttachAddressRequest {
            instance_id: "dev-1".to_string(),
            cidr_notation: "147.75.1.2/32".to_string(),
            delete_before_replace: true,
        })
        .await
        .unwrap();

    assert_eq!(attachment.id, "assignment-1");
    assert_eq!(attachment.instance_id, "dev-1");
    assert_eq!(attachment.cidr_notation, "147.75.1.2/32");
}

#[tokio::test]
async fn test_delete_missing_resource_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/devices/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/ips/assignment-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let metal = provider(&server);
    metal.delete_instance("gone").await.unwrap();
    metal.detach_address("assignment-1").await.unwrap();
}

#[tokio::test]
async fn test_api_error_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}/ips")))
        .respond_with(
            ResponseTemplate::new(422).set_body_string(r#"{"errors":["facility is full"]}"#),
        )
        .mount(&server)
        .await;

    let err = provider(&server)
        .reserve_address(ReserveAddressRequest {
            facility: Facility::Am6,
            quantity: 1,
        })
        .await
        .unwrap_err();

    match err {
        ProviderError::Api { status, message } => {
            assert_eq!(status, 422);
            assert!(message.contains("facility is full"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_empty_token_rejected() {
    assert!(matches!(
        EquinixMetal::new("", PROJECT),
        Err(ProviderError::Config(_))
    ));
}
