//! Participant bookkeeping
//!
//! Pure, synchronous tracking of who is in the call. The registry holds the
//! local participant and a map of remote participants keyed by their session
//! identity. Records are always replaced whole, never patched in place.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Session identity of a participant as reported by the media engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A party present in the call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Engine session identity
    pub id: ParticipantId,
    /// Display name (usually the user's email)
    pub user_name: Option<String>,
    /// Whether this record describes the current client
    pub local: bool,
    /// Camera track is on
    pub video: bool,
    /// Microphone track is on
    pub audio: bool,
}

impl Participant {
    /// Create a remote participant with both tracks off
    pub fn remote(id: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::new(id),
            user_name: None,
            local: false,
            video: false,
            audio: false,
        }
    }

    /// Create the local participant with both tracks off
    pub fn local(id: impl Into<String>) -> Self {
        Self { local: true, ..Self::remote(id) }
    }

    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    pub fn with_video(mut self, video: bool) -> Self {
        self.video = video;
        self
    }

    pub fn with_audio(mut self, audio: bool) -> Self {
        self.audio = audio;
        self
    }
}

/// Local participant plus remote participants keyed by identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRegistry {
    local: Option<Participant>,
    remote: HashMap<ParticipantId, Participant>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the local participant record
    ///
    /// A remote entry carrying the same identity is dropped so the local
    /// identity never appears among the remotes.
    pub fn set_local(&mut self, participant: Participant) {
        self.remote.remove(&participant.id);
        self.local = Some(Participant { local: true, ..participant });
    }

    /// Insert or replace a remote participant
    ///
    /// Returns `false` (and changes nothing) when the identity belongs to the
    /// local participant.
    pub fn upsert_remote(&mut self, participant: Participant) -> bool {
        if self.is_local(&participant.id) {
            return false;
        }
        let id = participant.id.clone();
        self.remote.insert(id, Participant { local: false, ..participant });
        true
    }

    /// Remove a remote participant, returning the removed record
    pub fn remove_remote(&mut self, id: &ParticipantId) -> Option<Participant> {
        self.remote.remove(id)
    }

    /// Whether `id` is the local participant's identity
    pub fn is_local(&self, id: &ParticipantId) -> bool {
        self.local.as_ref().is_some_and(|p| &p.id == id)
    }

    pub fn local(&self) -> Option<&Participant> {
        self.local.as_ref()
    }

    pub fn remote(&self, id: &ParticipantId) -> Option<&Participant> {
        self.remote.get(id)
    }

    pub fn remotes(&self) -> &HashMap<ParticipantId, Participant> {
        &self.remote
    }

    /// Camera state of the local participant, `false` before join
    pub fn local_video_state(&self) -> bool {
        self.local.as_ref().is_some_and(|p| p.video)
    }

    /// Microphone state of the local participant, `false` before join
    pub fn local_audio_state(&self) -> bool {
        self.local.as_ref().is_some_and(|p| p.audio)
    }

    pub fn remote_count(&self) -> usize {
        self.remote.len()
    }

    pub fn clear(&mut self) {
        self.local = None;
        self.remote.clear();
    }
}
