//! Media engine boundary
//!
//! The real-time audio/video engine is an external black box. This module
//! narrows it to five commands and six typed events:
//!
//! ```text
//! commands: join, leave, set_local_video, set_local_audio, destroy
//! events:   joined-meeting, participant-joined, participant-left,
//!           participant-updated, left-meeting, error
//! ```
//!
//! Engines are expensive and misbehave when more than one exists, so
//! instances are only obtained through the [`EngineRegistry`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{SessionError, SessionResult};
use crate::participant::{Participant, ParticipantId};

pub mod loopback;
pub mod registry;

pub use loopback::{LoopbackEngine, LoopbackEngineFactory};
pub use registry::{EngineFactory, EngineRegistry};

/// Identifies one event subscription on an engine
pub type SubscriptionId = Uuid;

/// Options for joining a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOptions {
    pub url: String,
    /// Identity shown to the other party
    pub user_name: String,
    pub start_with_video: bool,
    pub start_with_audio: bool,
}

/// Events pushed by the engine, in delivery order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum EngineEvent {
    #[serde(rename = "joined-meeting")]
    Joined { local: Participant },
    ParticipantJoined { participant: Participant },
    ParticipantLeft { id: ParticipantId },
    ParticipantUpdated { participant: Participant },
    #[serde(rename = "left-meeting")]
    Left,
    Error { message: String },
}

impl EngineEvent {
    /// Engine wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Joined { .. } => "joined-meeting",
            EngineEvent::ParticipantJoined { .. } => "participant-joined",
            EngineEvent::ParticipantLeft { .. } => "participant-left",
            EngineEvent::ParticipantUpdated { .. } => "participant-updated",
            EngineEvent::Left => "left-meeting",
            EngineEvent::Error { .. } => "error",
        }
    }
}

/// Command and event surface of a real-time media engine
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Join a room; resolves once the engine accepted or refused the join
    async fn join(&self, options: JoinOptions) -> SessionResult<()>;

    async fn leave(&self) -> SessionResult<()>;

    async fn set_local_video(&self, enabled: bool) -> SessionResult<()>;

    async fn set_local_audio(&self, enabled: bool) -> SessionResult<()>;

    /// Release all engine resources; the instance is unusable afterwards
    async fn destroy(&self) -> SessionResult<()>;

    /// Deliver future events to `sink`, in order
    ///
    /// Only the [`EventBridge`](crate::bridge::EventBridge) calls this.
    fn subscribe(&self, sink: mpsc::Sender<EngineEvent>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// A registry-issued engine instance tagged with its generation
///
/// The generation changes every time the registry constructs a new engine,
/// which lets consumers recognise events from a superseded instance.
#[derive(Clone)]
pub struct MediaEngineHandle {
    generation: u64,
    engine: Arc<dyn MediaEngine>,
}

impl std::fmt::Debug for MediaEngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaEngineHandle")
            .field("generation", &self.generation)
            .field("engine", &"<media engine>")
            .finish()
    }
}

impl MediaEngineHandle {
    pub(crate) fn new(generation: u64, engine: Arc<dyn MediaEngine>) -> Self {
        Self { generation, engine }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Join, reporting any failure as a join error
    pub async fn join(&self, options: JoinOptions) -> SessionResult<()> {
        info!(
            generation = self.generation,
            room_url = %options.url,
            start_with_video = options.start_with_video,
            "Joining room"
        );
        self.engine.join(options).await.map_err(|e| match e {
            SessionError::JoinFailed { .. } => e,
            other => SessionError::join_failed(other.to_string()),
        })
    }

    pub async fn leave(&self) -> SessionResult<()> {
        debug!(generation = self.generation, "Leaving room");
        self.engine.leave().await
    }

    pub async fn set_local_video(&self, enabled: bool) -> SessionResult<()> {
        debug!(generation = self.generation, enabled, "Requesting local video change");
        self.engine.set_local_video(enabled).await
    }

    pub async fn set_local_audio(&self, enabled: bool) -> SessionResult<()> {
        debug!(generation = self.generation, enabled, "Requesting local audio change");
        self.engine.set_local_audio(enabled).await
    }

    pub(crate) async fn destroy(&self) -> SessionResult<()> {
        debug!(generation = self.generation, "Destroying engine");
        self.engine.destroy().await
    }

    pub(crate) fn subscribe(&self, sink: mpsc::Sender<EngineEvent>) -> SubscriptionId {
        self.engine.subscribe(sink)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.engine.unsubscribe(id)
    }
}
