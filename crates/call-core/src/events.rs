//! Notifications published by the state machine
//!
//! UI layers normally render from the [`CallSnapshot`](crate::CallSnapshot)
//! watch channel. These notifications describe *what* changed and are
//! delivered on a broadcast channel; a subscriber that falls behind may miss
//! some, the snapshot never lags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::participant::{Participant, ParticipantId};
use crate::session::ConnectionState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        previous: ConnectionState,
        current: ConnectionState,
        at: DateTime<Utc>,
    },
    ParticipantJoined { participant: Participant },
    ParticipantUpdated { participant: Participant },
    ParticipantLeft { id: ParticipantId },
    /// The engine acknowledged a change of the local tracks
    LocalMediaChanged { video: bool, audio: bool },
    Error { message: String },
}

impl SessionEvent {
    pub(crate) fn state_changed(previous: ConnectionState, current: ConnectionState) -> Self {
        SessionEvent::StateChanged { previous, current, at: Utc::now() }
    }
}
