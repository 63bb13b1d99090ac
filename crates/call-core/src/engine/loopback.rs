//! In-process loopback engine
//!
//! Behaves like a well-mannered media engine without any media: joining
//! emits `joined-meeting`, track changes are acknowledged with a
//! `participant-updated` for the local participant, leaving emits
//! `left-meeting`. Failures and delays can be scripted, and arbitrary events
//! injected with [`LoopbackEngine::emit`]. Used by the test-suite and demos.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use tracing::debug;
use uuid::Uuid;

use super::{EngineEvent, EngineFactory, JoinOptions, MediaEngine, SubscriptionId};
use crate::error::{SessionError, SessionResult};
use crate::participant::{Participant, ParticipantId};

/// Scripted behaviour of a loopback engine
#[derive(Debug, Clone, Default)]
pub struct LoopbackScript {
    /// Refuse every join with this message
    pub fail_join: Option<String>,
    /// Reject every leave with this message
    pub fail_leave: Option<String>,
    /// Reject track changes with this message
    pub fail_toggles: Option<String>,
    /// Accept joins without ever emitting `joined-meeting`
    pub silent_join: bool,
    /// Do not acknowledge track changes with `participant-updated`
    pub manual_media_ack: bool,
    /// Joins wait for a notification on this gate (or for `leave()`)
    pub join_gate: Option<Arc<Notify>>,
    /// Simulate a slow leave
    pub leave_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct LoopbackState {
    script: LoopbackScript,
    subscribers: Vec<(SubscriptionId, mpsc::Sender<EngineEvent>)>,
    local: Option<Participant>,
    joined: bool,
    join_aborted: bool,
    destroyed: bool,
    join_calls: Vec<JoinOptions>,
    leave_calls: usize,
    video_commands: Vec<bool>,
    audio_commands: Vec<bool>,
}

#[derive(Debug, Default)]
pub struct LoopbackEngine {
    state: parking_lot::Mutex<LoopbackState>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: LoopbackScript) -> Self {
        let engine = Self::new();
        engine.state.lock().script = script;
        engine
    }

    /// Change the script of a live engine
    pub fn update_script(&self, f: impl FnOnce(&mut LoopbackScript)) {
        f(&mut self.state.lock().script);
    }

    /// Push an event to every subscriber, in order
    pub async fn emit(&self, event: EngineEvent) {
        let sinks: Vec<_> = self
            .state
            .lock()
            .subscribers
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        for (id, tx) in sinks {
            if tx.send(event.clone()).await.is_err() {
                self.state.lock().subscribers.retain(|(sid, _)| *sid != id);
            }
        }
    }

    pub fn local_participant(&self) -> Option<Participant> {
        self.state.lock().local.clone()
    }

    pub fn join_calls(&self) -> Vec<JoinOptions> {
        self.state.lock().join_calls.clone()
    }

    pub fn leave_count(&self) -> usize {
        self.state.lock().leave_calls
    }

    pub fn video_commands(&self) -> Vec<bool> {
        self.state.lock().video_commands.clone()
    }

    pub fn audio_commands(&self) -> Vec<bool> {
        self.state.lock().audio_commands.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub fn is_joined(&self) -> bool {
        self.state.lock().joined
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Record a track command and build the acknowledgement, if any
    fn apply_track(&self, video: Option<bool>, audio: Option<bool>) -> SessionResult<Option<EngineEvent>> {
        let mut st = self.state.lock();
        if let Some(enabled) = video {
            st.video_commands.push(enabled);
        }
        if let Some(enabled) = audio {
            st.audio_commands.push(enabled);
        }
        if st.destroyed || !st.joined {
            return Err(SessionError::engine_error("not joined"));
        }
        if let Some(reason) = &st.script.fail_toggles {
            return Err(SessionError::engine_error(reason.clone()));
        }
        if st.script.manual_media_ack {
            return Ok(None);
        }

        let Some(local) = st.local.as_mut() else {
            return Ok(None);
        };
        if let Some(enabled) = video {
            local.video = enabled;
        }
        if let Some(enabled) = audio {
            local.audio = enabled;
        }
        Ok(Some(EngineEvent::ParticipantUpdated { participant: local.clone() }))
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    async fn join(&self, options: JoinOptions) -> SessionResult<()> {
        let gate = {
            let mut st = self.state.lock();
            if st.destroyed {
                return Err(SessionError::engine_error("engine destroyed"));
            }
            st.join_calls.push(options.clone());
            st.join_aborted = false;
            if let Some(reason) = &st.script.fail_join {
                return Err(SessionError::join_failed(reason.clone()));
            }
            st.script.join_gate.clone()
        };

        if let Some(gate) = gate {
            gate.notified().await;
        }

        let (local, silent) = {
            let mut st = self.state.lock();
            if st.join_aborted || st.destroyed {
                return Err(SessionError::join_failed("join aborted"));
            }
            let local = Participant {
                id: ParticipantId::new(format!("local-{}", Uuid::new_v4())),
                user_name: Some(options.user_name.clone()),
                local: true,
                video: options.start_with_video,
                audio: options.start_with_audio,
            };
            st.local = Some(local.clone());
            st.joined = true;
            (local, st.script.silent_join)
        };

        debug!(room_url = %options.url, "Loopback engine joined");
        if !silent {
            self.emit(EngineEvent::Joined { local }).await;
        }
        Ok(())
    }

    async fn leave(&self) -> SessionResult<()> {
        let delay = self.state.lock().script.leave_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let (was_joined, gate) = {
            let mut st = self.state.lock();
            st.leave_calls += 1;
            if let Some(reason) = &st.script.fail_leave {
                return Err(SessionError::engine_error(reason.clone()));
            }
            st.join_aborted = true;
            let was_joined = st.joined;
            st.joined = false;
            st.local = None;
            (was_joined, st.script.join_gate.clone())
        };

        // Wake a join suspended on the gate so it can observe the abort
        if let Some(gate) = gate {
            gate.notify_one();
        }
        if was_joined {
            self.emit(EngineEvent::Left).await;
        }
        Ok(())
    }

    async fn set_local_video(&self, enabled: bool) -> SessionResult<()> {
        if let Some(ack) = self.apply_track(Some(enabled), None)? {
            self.emit(ack).await;
        }
        Ok(())
    }

    async fn set_local_audio(&self, enabled: bool) -> SessionResult<()> {
        if let Some(ack) = self.apply_track(None, Some(enabled))? {
            self.emit(ack).await;
        }
        Ok(())
    }

    async fn destroy(&self) -> SessionResult<()> {
        let mut st = self.state.lock();
        st.destroyed = true;
        st.joined = false;
        st.local = None;
        st.subscribers.clear();
        Ok(())
    }

    fn subscribe(&self, sink: mpsc::Sender<EngineEvent>) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.state.lock().subscribers.push((id, sink));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut st = self.state.lock();
        let before = st.subscribers.len();
        st.subscribers.retain(|(sid, _)| *sid != id);
        st.subscribers.len() != before
    }
}

/// Factory producing [`LoopbackEngine`]s and keeping every instance it built
#[derive(Debug, Default)]
pub struct LoopbackEngineFactory {
    script: LoopbackScript,
    create_delay: Option<Duration>,
    fail_create: Option<String>,
    engines: parking_lot::Mutex<Vec<Arc<LoopbackEngine>>>,
}

impl LoopbackEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script applied to every engine built from now on
    pub fn with_script(mut self, script: LoopbackScript) -> Self {
        self.script = script;
        self
    }

    /// Simulate an expensive engine construction
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn with_create_failure(mut self, reason: impl Into<String>) -> Self {
        self.fail_create = Some(reason.into());
        self
    }

    pub fn created_count(&self) -> usize {
        self.engines.lock().len()
    }

    pub fn engines(&self) -> Vec<Arc<LoopbackEngine>> {
        self.engines.lock().clone()
    }

    /// Most recently built engine
    pub fn latest(&self) -> Option<Arc<LoopbackEngine>> {
        self.engines.lock().last().cloned()
    }
}

#[async_trait]
impl EngineFactory for LoopbackEngineFactory {
    async fn create(&self) -> SessionResult<Arc<dyn MediaEngine>> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.fail_create {
            return Err(SessionError::engine_error(reason.clone()));
        }
        let engine = Arc::new(LoopbackEngine::with_script(self.script.clone()));
        self.engines.lock().push(engine.clone());
        Ok(engine)
    }
}
