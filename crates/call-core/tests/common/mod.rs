//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use livecall_call_core::{
    CallSnapshot, EngineRegistry, LoopbackEngine, LoopbackEngineFactory, LoopbackScript, SessionBuilder,
    SessionStateMachine,
};

pub const ROOM_PATH: &str = "/video-call/create-room";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("livecall_call_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Answers every room request with `https://call/<sessionId>`
pub struct EchoRoom;

impl Respond for EchoRoom {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let session_id = body["sessionId"].as_str().unwrap_or("unknown").to_string();
        ResponseTemplate::new(200).set_body_json(json!({
            "url": format!("https://call/{}", session_id),
            "name": session_id,
        }))
    }
}

pub async fn mount_echo_room(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(ROOM_PATH))
        .respond_with(EchoRoom)
        .mount(server)
        .await;
}

pub fn endpoint(server: &MockServer) -> String {
    format!("{}{}", server.uri(), ROOM_PATH)
}

/// A session wired to a mock provisioning service and a loopback engine
pub struct Harness {
    pub server: MockServer,
    pub factory: Arc<LoopbackEngineFactory>,
    pub engines: Arc<EngineRegistry>,
    pub session: Arc<SessionStateMachine>,
}

impl Harness {
    /// Echoing provisioning service, default engine
    pub async fn new() -> Self {
        let server = MockServer::start().await;
        mount_echo_room(&server).await;
        Self::with(server, LoopbackScript::default()).await
    }

    pub async fn with_script(script: LoopbackScript) -> Self {
        let server = MockServer::start().await;
        mount_echo_room(&server).await;
        Self::with(server, script).await
    }

    /// Bring your own mocks
    pub async fn with(server: MockServer, script: LoopbackScript) -> Self {
        Self::with_factory(server, LoopbackEngineFactory::new().with_script(script)).await
    }

    pub async fn with_factory(server: MockServer, factory: LoopbackEngineFactory) -> Self {
        init_tracing();
        let factory = Arc::new(factory);
        let engines = Arc::new(EngineRegistry::new(factory.clone()));
        let session = SessionBuilder::new()
            .provisioning_endpoint(endpoint(&server))
            .engine_registry(engines.clone())
            .build()
            .expect("session builds");
        Self { server, factory, engines, session }
    }

    /// A second session sharing this harness' engine registry
    pub fn another_session(&self) -> Arc<SessionStateMachine> {
        SessionBuilder::new()
            .provisioning_endpoint(endpoint(&self.server))
            .engine_registry(self.engines.clone())
            .build()
            .expect("session builds")
    }

    pub fn engine(&self) -> Arc<LoopbackEngine> {
        self.factory.latest().expect("an engine was created")
    }

    pub async fn provisioning_requests(&self) -> usize {
        self.server.received_requests().await.map(|r| r.len()).unwrap_or(0)
    }

    pub async fn wait_for(&self, pred: impl FnMut(&CallSnapshot) -> bool) -> CallSnapshot {
        wait_for(&self.session, pred).await
    }
}

/// Wait (bounded) until the published snapshot satisfies `pred`
pub async fn wait_for(session: &SessionStateMachine, pred: impl FnMut(&CallSnapshot) -> bool) -> CallSnapshot {
    let mut rx = session.subscribe();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(pred))
        .await
        .expect("timed out waiting for session state")
        .expect("state channel closed")
        .clone()
}

/// Poll until `check` holds, for engine-side conditions with no channel
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
