//! # Live call session orchestration
//!
//! Coordinates a two-party video call between a support agent and a
//! customer: a room is provisioned through an HTTP service, a single media
//! engine instance joins it, and the engine's event stream is folded into
//! one observable [`CallSession`].
//!
//! ## Components
//!
//! - [`RoomProvisioningClient`] creates (or returns) the room for a support
//!   session through a [`RoomProvisioner`] seam.
//! - [`EngineRegistry`] owns the single [`MediaEngine`] instance of the
//!   process and leases it to one session at a time.
//! - [`EventBridge`] drains engine events, in order, into the session.
//! - [`SessionStateMachine`] is the only writer of the session; UIs read it
//!   through [`CallSnapshot`]s and [`SessionEvent`]s.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use livecall_call_core::{ConnectionState, LoopbackEngineFactory, SessionBuilder};
//!
//! # tokio_test::block_on(async {
//! let session = SessionBuilder::new()
//!     .provisioning_endpoint("https://api.example.com/video-call/create-room")
//!     .engine_factory(Arc::new(LoopbackEngineFactory::new()))
//!     .build()?;
//!
//! let mut state = session.subscribe();
//! tokio::spawn(async move {
//!     while state.changed().await.is_ok() {
//!         let snapshot = state.borrow().clone();
//!         println!("{:?} joined={}", snapshot.connection_state, snapshot.is_joined);
//!     }
//! });
//!
//! assert_eq!(session.snapshot().connection_state, ConnectionState::Idle);
//! # Ok::<(), livecall_call_core::SessionError>(())
//! # }).unwrap();
//! ```

pub mod bridge;
pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod machine;
pub mod participant;
pub mod provisioning;
pub mod session;

pub use bridge::EventBridge;
pub use builder::SessionBuilder;
pub use config::{ProvisioningConfig, SessionConfig};
pub use engine::{
    EngineEvent, EngineFactory, EngineRegistry, JoinOptions, LoopbackEngine, LoopbackEngineFactory,
    MediaEngine, MediaEngineHandle, SubscriptionId,
};
pub use engine::loopback::LoopbackScript;
pub use error::{SessionError, SessionResult};
pub use events::SessionEvent;
pub use machine::SessionStateMachine;
pub use participant::{Participant, ParticipantId, ParticipantRegistry};
pub use provisioning::{RoomDescriptor, RoomProvisioner, RoomProvisioningClient};
pub use session::{CallRole, CallSession, CallSnapshot, ConnectionState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
