//! Loopback Call Example
//!
//! Runs a complete agent-side call against the in-process loopback engine:
//! the room comes from a local provisioner, a customer joins and leaves,
//! the camera is toggled and the call is ended. Every published snapshot is
//! printed as JSON.
//!
//! Run with: cargo run --example loopback_call
//! Set RUST_LOG=livecall_call_core=debug for the state machine's logs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use livecall_call_core::{
    CallRole, ConnectionState, EngineEvent, LoopbackEngineFactory, Participant, RoomDescriptor, RoomProvisioner,
    SessionBuilder, SessionEvent, SessionResult,
};

/// Hands out rooms without talking to a provisioning service
struct LocalRooms;

#[async_trait]
impl RoomProvisioner for LocalRooms {
    async fn create_room(&self, session_id: &str, _: &str, _: &str) -> SessionResult<RoomDescriptor> {
        Ok(RoomDescriptor {
            url: format!("https://rooms.localhost/{}", session_id),
            name: format!("support-{}", session_id),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("📞 Loopback Call Example");
    println!("========================\n");

    let factory = Arc::new(LoopbackEngineFactory::new());
    let session = SessionBuilder::new()
        .provisioner(Arc::new(LocalRooms))
        .engine_factory(factory.clone())
        .join_timeout(Duration::from_secs(5))
        .build()?;

    let mut snapshots = session.subscribe();
    let printer = tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            match serde_json::to_string(&snapshot) {
                Ok(json) => println!("📸 {}", json),
                Err(e) => eprintln!("snapshot not serializable: {}", e),
            }
            if snapshot.connection_state == ConnectionState::Idle {
                break;
            }
        }
    });

    let mut events = session.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let SessionEvent::StateChanged { previous, current, .. } = event {
                println!("🔄 {:?} -> {:?}", previous, current);
            }
        }
    });

    session.start_call("case-1042", "agent@example.com", "customer@example.com", CallRole::Agent).await?;
    println!("\n✅ Connected\n");

    let engine = factory.latest().ok_or_else(|| anyhow::anyhow!("no engine was created"))?;
    let customer = Participant::remote("customer@example.com")
        .with_user_name("customer@example.com")
        .with_audio(true);
    engine.emit(EngineEvent::ParticipantJoined { participant: customer.clone() }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let video = session.toggle_local_video().await?;
    println!("\n🎥 Requested camera {}", if video { "on" } else { "off" });
    tokio::time::sleep(Duration::from_millis(50)).await;

    engine.emit(EngineEvent::ParticipantLeft { id: customer.id.clone() }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    session.end_call().await;
    printer.await?;
    println!("\n👋 Call ended");

    Ok(())
}
