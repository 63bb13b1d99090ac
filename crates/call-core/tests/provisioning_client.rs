//! Room provisioning client against a mock HTTP service

mod common;

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{ROOM_PATH, endpoint, init_tracing};
use livecall_call_core::{ProvisioningConfig, RoomDescriptor, RoomProvisioner, RoomProvisioningClient, SessionError};

fn client(server: &MockServer) -> RoomProvisioningClient {
    init_tracing();
    RoomProvisioningClient::new(ProvisioningConfig { endpoint: endpoint(server), ..Default::default() }).unwrap()
}

#[tokio::test]
async fn test_flat_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ROOM_PATH))
        .and(body_json(json!({ "sessionId": "s1", "userEmail": "agent@x", "targetUserEmail": "cust@y" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "url": "https://call/s1", "name": "s1" })))
        .expect(1)
        .mount(&server)
        .await;

    let room = client(&server).create_room("s1", "agent@x", "cust@y").await.unwrap();
    assert_eq!(room, RoomDescriptor { url: "https://call/s1".into(), name: "s1".into() });
}

#[tokio::test]
async fn test_data_wrapped_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ROOM_PATH))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "success": true,
            "data": { "url": "https://call/s9", "name": "support-s9" }
        })))
        .mount(&server)
        .await;

    let room = client(&server).create_room("s9", "agent@x", "cust@y").await.unwrap();
    assert_eq!(room.url, "https://call/s9");
    assert_eq!(room.name, "support-s9");
}

#[tokio::test]
async fn test_bearer_token_and_user_agent_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ROOM_PATH))
        .and(header("authorization", "Bearer secret-token"))
        .and(header("user-agent", "support-desk/2.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "url": "https://call/s1", "name": "s1" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = RoomProvisioningClient::new(ProvisioningConfig {
        endpoint: endpoint(&server),
        auth_token: Some("secret-token".into()),
        user_agent: "support-desk/2.1".into(),
        ..Default::default()
    })
    .unwrap();

    assert!(client.create_room("s1", "agent@x", "cust@y").await.is_ok());
}

#[tokio::test]
async fn test_client_error_is_not_recoverable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ROOM_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("agent not allowed"))
        .mount(&server)
        .await;

    let err = client(&server).create_room("s1", "agent@x", "cust@y").await.unwrap_err();
    match &err {
        SessionError::ProvisioningFailed { reason, status } => {
            assert_eq!(*status, Some(403));
            assert!(reason.contains("agent not allowed"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn test_long_error_body_is_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ROOM_PATH))
        .respond_with(ResponseTemplate::new(502).set_body_string("x".repeat(5000)))
        .mount(&server)
        .await;

    let err = client(&server).create_room("s1", "agent@x", "cust@y").await.unwrap_err();
    assert!(err.to_string().len() < 400);
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_malformed_or_empty_room_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ROOM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "url": "", "name": "s1" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(ROOM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;
    let client = client(&server);

    let empty = client.create_room("s1", "agent@x", "cust@y").await.unwrap_err();
    assert!(matches!(empty, SessionError::ProvisioningFailed { status: Some(200), .. }));

    let garbage = client.create_room("s1", "agent@x", "cust@y").await.unwrap_err();
    assert!(garbage.to_string().contains("invalid room response"));
}

#[tokio::test]
async fn test_unreachable_service() {
    // Grab a free port and close it again
    let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let endpoint = format!("http://127.0.0.1:{}{}", port, ROOM_PATH);

    let client = RoomProvisioningClient::new(ProvisioningConfig {
        endpoint,
        request_timeout_ms: 2000,
        ..Default::default()
    })
    .unwrap();

    let err = client.create_room("s1", "agent@x", "cust@y").await.unwrap_err();
    assert!(matches!(err, SessionError::ProvisioningFailed { status: None, .. }));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ROOM_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "url": "https://call/s1", "name": "s1" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = RoomProvisioningClient::new(ProvisioningConfig {
        endpoint: endpoint(&server),
        request_timeout_ms: 1000,
        ..Default::default()
    })
    .unwrap();

    let err = client.create_room("s1", "agent@x", "cust@y").await.unwrap_err();
    assert!(matches!(err, SessionError::ProvisioningFailed { status: None, .. }));
}
