//! Call session data model
//!
//! `CallSession` is the aggregate root of a live call. It is only mutated by
//! the [`SessionStateMachine`](crate::SessionStateMachine); everyone else sees
//! it through a [`CallSnapshot`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::participant::{Participant, ParticipantId, ParticipantRegistry};

/// Connection lifecycle of a call session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No call; initial and terminal state
    #[default]
    Idle,
    /// Provisioning a room and/or joining it
    Connecting,
    /// Joined and exchanging media
    Connected,
    /// Tearing down after `end_call()`; always ends in `Idle`
    Leaving,
    /// A failure was surfaced; `last_error` holds the message
    Error,
}

impl ConnectionState {
    /// Commands must not be issued while an operation is suspended
    pub fn is_busy(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Leaving)
    }
}

/// Role of the local participant in a two-party support call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallRole {
    Agent,
    Customer,
}

impl CallRole {
    /// Agents join with the camera on, customers with it off
    pub fn starts_with_video(&self) -> bool {
        matches!(self, CallRole::Agent)
    }
}

/// The live call aggregate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallSession {
    pub(crate) session_id: Option<String>,
    pub(crate) room_url: Option<String>,
    pub(crate) room_name: Option<String>,
    pub(crate) connection_state: ConnectionState,
    pub(crate) is_joined: bool,
    pub(crate) participants: ParticipantRegistry,
    pub(crate) is_local_video_enabled: bool,
    pub(crate) is_local_audio_enabled: bool,
    pub(crate) role: Option<CallRole>,
    pub(crate) last_error: Option<String>,
}

impl CallSession {
    /// A fresh `Idle` session
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn is_joined(&self) -> bool {
        self.is_joined
    }

    pub fn room_url(&self) -> Option<&str> {
        self.room_url.as_deref()
    }

    pub fn participants(&self) -> &ParticipantRegistry {
        &self.participants
    }

    /// Move to `Error`, recording the message
    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.connection_state = ConnectionState::Error;
        self.last_error = Some(message.into());
    }

    /// Move to a non-error state, clearing any previous error
    pub(crate) fn transition(&mut self, state: ConnectionState) {
        debug_assert!(state != ConnectionState::Error, "use fail() to enter Error");
        self.connection_state = state;
        self.last_error = None;
    }

    /// Replace the local participant and mirror its media state
    pub(crate) fn set_local(&mut self, participant: Participant) {
        self.is_local_video_enabled = participant.video;
        self.is_local_audio_enabled = participant.audio;
        self.participants.set_local(participant);
    }

    /// Return the first violated invariant, if any
    pub fn check_invariants(&self) -> Result<(), &'static str> {
        if self.is_joined {
            // An engine error mid-call keeps the join (the engine may recover)
            if !matches!(self.connection_state, ConnectionState::Connected | ConnectionState::Error) {
                return Err("joined session must be Connected or Error");
            }
            if self.room_url.is_none() {
                return Err("joined session must have a room url");
            }
        }
        if let Some(local) = self.participants.local() {
            if self.participants.remote(&local.id).is_some() {
                return Err("local identity present among remote participants");
            }
        }
        match (self.connection_state, &self.last_error) {
            (ConnectionState::Error, None) => Err("Error state without last_error"),
            (ConnectionState::Error, Some(_)) => Ok(()),
            (_, Some(_)) => Err("last_error set outside Error state"),
            (_, None) => Ok(()),
        }
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            session_id: self.session_id.clone(),
            room_url: self.room_url.clone(),
            room_name: self.room_name.clone(),
            connection_state: self.connection_state,
            is_connecting: self.connection_state == ConnectionState::Connecting,
            is_busy: self.connection_state.is_busy(),
            is_joined: self.is_joined,
            local_participant: self.participants.local().cloned(),
            remote_participants: self.participants.remotes().clone(),
            is_local_video_enabled: self.is_local_video_enabled,
            is_local_audio_enabled: self.is_local_audio_enabled,
            role: self.role,
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only view of a [`CallSession`] for UI layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub session_id: Option<String>,
    pub room_url: Option<String>,
    pub room_name: Option<String>,
    pub connection_state: ConnectionState,
    /// True while a `start_call` is suspended
    pub is_connecting: bool,
    /// True while any command is suspended; new commands are rejected
    pub is_busy: bool,
    pub is_joined: bool,
    pub local_participant: Option<Participant>,
    pub remote_participants: HashMap<ParticipantId, Participant>,
    pub is_local_video_enabled: bool,
    pub is_local_audio_enabled: bool,
    pub role: Option<CallRole>,
    pub last_error: Option<String>,
}

impl Default for CallSnapshot {
    fn default() -> Self {
        CallSession::new().snapshot()
    }
}
