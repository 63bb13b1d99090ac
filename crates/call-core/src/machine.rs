//! Session state machine
//!
//! Owns the [`CallSession`] and is the only code that mutates it, either in
//! response to a command (`start_call`, `end_call`, track toggles) or to an
//! engine event delivered by the [`EventBridge`].
//!
//! ```text
//!            start_call                 joined-meeting
//!   Idle ─────────────────► Connecting ───────────────► Connected
//!    ▲                          │  provisioning/join         │
//!    │                          │  failure, error event      │ error / left-meeting
//!    │                          ▼                            ▼
//!    │        end_call       Error ◄─────────────────────────┘
//!    └──────── Leaving ◄────────┴──── (any non-Idle state) ◄── end_call
//! ```
//!
//! Every mutation happens under one short lock and is published as a fresh
//! [`CallSnapshot`] before the lock is released, so observers see changes
//! in exactly the order they were applied.
//!
//! Commands that suspend (`start_call`, `end_call`) tag their work with an
//! attempt epoch. `end_call` bumps the epoch, which makes a `start_call`
//! suspended at that moment give up with [`SessionError::Cancelled`] instead
//! of touching the fresh session.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bridge::EventBridge;
use crate::config::SessionConfig;
use crate::engine::{EngineEvent, EngineRegistry, JoinOptions, MediaEngineHandle};
use crate::error::{SessionError, SessionResult};
use crate::events::SessionEvent;
use crate::participant::Participant;
use crate::provisioning::{RoomDescriptor, RoomProvisioner};
use crate::session::{CallRole, CallSession, CallSnapshot, ConnectionState};

/// Capacity of the notification broadcast channel
const EVENT_BROADCAST_CAPACITY: usize = 256;

pub struct SessionStateMachine {
    id: Uuid,
    config: SessionConfig,
    provisioner: Arc<dyn RoomProvisioner>,
    engines: Arc<EngineRegistry>,
    shared: Arc<Shared>,
}

struct Shared {
    inner: parking_lot::Mutex<Inner>,
    state_tx: watch::Sender<CallSnapshot>,
    event_tx: broadcast::Sender<SessionEvent>,
}

#[derive(Default)]
struct Inner {
    session: CallSession,
    /// Bumped when a start attempt begins and when `end_call` supersedes it
    epoch: u64,
    engine: Option<MediaEngineHandle>,
    bridge: Option<EventBridge>,
}

/// A `start_call` in flight
struct Attempt {
    epoch: u64,
    role: CallRole,
    room: Option<RoomDescriptor>,
}

impl std::fmt::Debug for SessionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStateMachine")
            .field("id", &self.id)
            .field("state", &self.snapshot().connection_state)
            .finish()
    }
}

impl SessionStateMachine {
    pub fn new(
        config: SessionConfig,
        provisioner: Arc<dyn RoomProvisioner>,
        engines: Arc<EngineRegistry>,
    ) -> SessionResult<Self> {
        config.validate()?;

        let (state_tx, _) = watch::channel(CallSnapshot::default());
        let (event_tx, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        let shared = Arc::new(Shared {
            inner: parking_lot::Mutex::new(Inner::default()),
            state_tx,
            event_tx,
        });

        Ok(Self {
            id: Uuid::new_v4(),
            config,
            provisioner,
            engines,
            shared,
        })
    }

    /// Identity of this state machine in the engine registry
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current read-only view of the session
    pub fn snapshot(&self) -> CallSnapshot {
        self.shared.state_tx.borrow().clone()
    }

    /// Watch the session; a new snapshot is published after every change
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.shared.state_tx.subscribe()
    }

    /// Receive change notifications
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// True while a command is suspended; new commands are rejected or ignored
    pub fn is_busy(&self) -> bool {
        self.shared.inner.lock().session.connection_state.is_busy()
    }

    /// Provision a room (if needed) and join it
    ///
    /// Ignored when a call is already connecting or connected, when the
    /// session is tearing down, or when any identity is empty. From `Error`
    /// the same session may be retried, reusing its room; a different
    /// session requires `end_call()` first.
    ///
    /// Resolves once the engine reports `joined-meeting`. Provisioning and
    /// join failures move the session to `Error` and are returned; nothing
    /// is retried.
    pub async fn start_call(
        &self,
        session_id: &str,
        local_identity: &str,
        remote_identity: &str,
        role: CallRole,
    ) -> SessionResult<()> {
        if [session_id, local_identity, remote_identity].iter().any(|s| s.trim().is_empty()) {
            debug!(session_id, "start_call ignored: missing session or identity");
            return Ok(());
        }

        let attempt = self.shared.update(|inner, _| begin_attempt(inner, session_id, role))?;
        let Some(attempt) = attempt else {
            return Ok(());
        };

        info!(session_id, ?role, epoch = attempt.epoch, "Starting call");
        match self.run_attempt(&attempt, session_id, local_identity, remote_identity).await {
            Ok(()) => {
                info!(session_id, "Call connected");
                Ok(())
            }
            Err(e) => self.fail_attempt(attempt.epoch, e),
        }
    }

    async fn run_attempt(
        &self,
        attempt: &Attempt,
        session_id: &str,
        local_identity: &str,
        remote_identity: &str,
    ) -> SessionResult<()> {
        let room = match &attempt.room {
            Some(room) => {
                debug!(session_id, room_url = %room.url, "Reusing provisioned room");
                room.clone()
            }
            None => {
                let room = self
                    .provisioner
                    .create_room(session_id, local_identity, remote_identity)
                    .await?;
                self.shared.update(|inner, _| {
                    if inner.epoch != attempt.epoch {
                        return Err(SessionError::Cancelled);
                    }
                    inner.session.room_url = Some(room.url.clone());
                    inner.session.room_name = Some(room.name.clone());
                    Ok(())
                })?;
                room
            }
        };

        let handle = self.engines.acquire(self.id).await?;
        if !self.attach_engine(attempt.epoch, &handle) {
            self.release_orphan(handle).await;
            return Err(SessionError::Cancelled);
        }

        let options = JoinOptions {
            url: room.url,
            user_name: local_identity.to_string(),
            start_with_video: attempt.role.starts_with_video(),
            start_with_audio: true,
        };
        let join = async {
            handle.join(options).await?;
            self.wait_until_joined(attempt.epoch).await
        };

        match self.config.join_timeout() {
            Some(limit) => tokio::time::timeout(limit, join).await.map_err(|_| {
                SessionError::OperationTimeout { duration_ms: limit.as_millis() as u64 }
            })?,
            None => join.await,
        }
    }

    /// Make `handle` the session's engine and bridge its events
    ///
    /// Returns `false` when the attempt was superseded meanwhile.
    fn attach_engine(&self, epoch: u64, handle: &MediaEngineHandle) -> bool {
        let weak = Arc::downgrade(&self.shared);
        let capacity = self.config.event_channel_capacity;

        self.shared.update(|inner, _| {
            if inner.epoch != epoch {
                return false;
            }
            if inner.bridge.as_ref().map(EventBridge::generation) != Some(handle.generation()) {
                // Replacing the bridge drops the old subscription first
                inner.bridge = Some(EventBridge::attach(handle.clone(), capacity, move |generation, event| {
                    if let Some(shared) = weak.upgrade() {
                        shared.apply_engine_event(generation, event);
                    }
                }));
            }
            inner.engine = Some(handle.clone());
            true
        })
    }

    /// Release an engine acquired by an attempt that `end_call` superseded
    async fn release_orphan(&self, handle: MediaEngineHandle) {
        let in_use = {
            let inner = self.shared.inner.lock();
            inner.engine.as_ref().map(MediaEngineHandle::generation) == Some(handle.generation())
        };
        if in_use {
            return;
        }
        debug!(generation = handle.generation(), "Releasing engine of a cancelled start");
        if let Err(e) = self.engines.release(self.id, handle.generation()).await {
            warn!(error = %e, "Failed to destroy engine of a cancelled start");
        }
    }

    async fn wait_until_joined(&self, epoch: u64) -> SessionResult<()> {
        let mut state_rx = self.shared.state_tx.subscribe();
        loop {
            {
                let inner = self.shared.inner.lock();
                if inner.epoch != epoch {
                    return Err(SessionError::Cancelled);
                }
                match inner.session.connection_state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Error => {
                        let reason = inner.session.last_error.clone().unwrap_or_default();
                        return Err(SessionError::join_failed(reason));
                    }
                    ConnectionState::Idle | ConnectionState::Leaving => {
                        return Err(SessionError::Cancelled);
                    }
                    ConnectionState::Connecting => {}
                }
            }
            if state_rx.changed().await.is_err() {
                return Err(SessionError::Cancelled);
            }
        }
    }

    /// Surface a failed attempt as `Error`, unless it was superseded
    fn fail_attempt(&self, epoch: u64, err: SessionError) -> SessionResult<()> {
        self.shared.update(|inner, events| {
            if inner.epoch != epoch {
                debug!(error = %err, "Cancelled start_call finished");
                return Err(SessionError::Cancelled);
            }
            match inner.session.connection_state {
                ConnectionState::Connecting => {
                    error!(
                        session_id = inner.session.session_id.as_deref().unwrap_or("-"),
                        error = %err,
                        category = err.category(),
                        "Call setup failed"
                    );
                    let message = err.to_string();
                    inner.session.fail(message.clone());
                    events.push(SessionEvent::Error { message });
                    Err(err)
                }
                // The engine got there after all (late joined-meeting)
                ConnectionState::Connected => Ok(()),
                _ => Err(err),
            }
        })
    }

    /// Leave the call and reset to a fresh `Idle` session
    ///
    /// Works from any non-`Idle` state, including while `start_call` is
    /// suspended. Engine failures during leave or destroy are logged and
    /// never prevent the local reset. A call made while another `end_call`
    /// is tearing down waits for that teardown to finish.
    pub async fn end_call(&self) {
        let taken = self.shared.update(|inner, _| match inner.session.connection_state {
            state @ (ConnectionState::Idle | ConnectionState::Leaving) => Err(state),
            _ => {
                inner.epoch += 1;
                inner.session.is_joined = false;
                inner.session.transition(ConnectionState::Leaving);
                Ok((inner.engine.take(), inner.bridge.take()))
            }
        });
        let (engine, bridge) = match taken {
            Ok(taken) => taken,
            Err(ConnectionState::Leaving) => {
                debug!("end_call waiting for teardown in progress");
                let mut state_rx = self.shared.state_tx.subscribe();
                let _ = state_rx.wait_for(|s| s.connection_state != ConnectionState::Leaving).await;
                return;
            }
            Err(_) => {
                debug!("end_call ignored: no active call");
                return;
            }
        };

        // Detach first so our own left-meeting cannot reach the session
        drop(bridge);

        // Without an engine, a start still inside `acquire` owns the lease
        // and hands it back through `release_orphan`
        if let Some(handle) = engine {
            if let Err(e) = handle.leave().await {
                warn!(error = %e, "Engine leave failed, continuing teardown");
            }
            if let Err(e) = self.engines.release(self.id, handle.generation()).await {
                warn!(error = %e, "Engine destroy failed, continuing teardown");
            }
        }

        self.shared.update(|inner, _| {
            inner.session = CallSession::new();
        });
        info!("Call ended");
    }

    /// Ask the engine to flip the local camera
    ///
    /// The snapshot is not touched here; it changes when the engine
    /// acknowledges with `participant-updated`. Returns the requested state.
    pub async fn toggle_local_video(&self) -> SessionResult<bool> {
        let (handle, desired) =
            self.connected_engine("toggle_local_video", |s| !s.is_local_video_enabled)?;
        handle.set_local_video(desired).await.inspect_err(|e| {
            warn!(error = %e, desired, "Local video change rejected by engine");
        })?;
        Ok(desired)
    }

    /// Ask the engine to flip the local microphone
    ///
    /// Like [`toggle_local_video`](Self::toggle_local_video), the new state
    /// only shows once the engine acknowledges it.
    pub async fn toggle_local_audio(&self) -> SessionResult<bool> {
        let (handle, desired) =
            self.connected_engine("toggle_local_audio", |s| !s.is_local_audio_enabled)?;
        handle.set_local_audio(desired).await.inspect_err(|e| {
            warn!(error = %e, desired, "Local audio change rejected by engine");
        })?;
        Ok(desired)
    }

    fn connected_engine(
        &self,
        operation: &str,
        desired: impl FnOnce(&CallSession) -> bool,
    ) -> SessionResult<(MediaEngineHandle, bool)> {
        let inner = self.shared.inner.lock();
        let state = inner.session.connection_state;
        match (&inner.engine, state) {
            (Some(handle), ConnectionState::Connected) => Ok((handle.clone(), desired(&inner.session))),
            _ => Err(SessionError::InvalidState { operation: operation.to_string(), state }),
        }
    }
}

impl Drop for SessionStateMachine {
    fn drop(&mut self) {
        let (engine, bridge) = {
            let mut inner = self.shared.inner.lock();
            (inner.engine.take(), inner.bridge.take())
        };
        drop(bridge);

        let Some(handle) = engine else {
            return;
        };
        // Unmounted without end_call: tear the engine down in the background
        let engines = self.engines.clone();
        let owner = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = handle.leave().await {
                        warn!(error = %e, "Engine leave failed during drop");
                    }
                    if let Err(e) = engines.release(owner, handle.generation()).await {
                        warn!(error = %e, "Engine destroy failed during drop");
                    }
                });
            }
            Err(_) => {
                warn!(generation = handle.generation(), "Dropped outside a runtime, engine not destroyed");
                engines.try_clear_owner(owner);
            }
        }
    }
}

/// Guard and set up a new start attempt
fn begin_attempt(inner: &mut Inner, session_id: &str, role: CallRole) -> SessionResult<Option<Attempt>> {
    let session = &mut inner.session;
    match session.connection_state {
        ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Leaving => {
            debug!(session_id, state = ?session.connection_state, "start_call ignored: call already active");
            return Ok(None);
        }
        ConnectionState::Error if session.is_joined => {
            debug!(session_id, "start_call ignored: engine still joined");
            return Ok(None);
        }
        ConnectionState::Error if session.session_id.as_deref() != Some(session_id) => {
            return Err(SessionError::InvalidState {
                operation: "start_call".to_string(),
                state: ConnectionState::Error,
            });
        }
        ConnectionState::Error => {}
        ConnectionState::Idle => {
            *session = CallSession::new();
            session.session_id = Some(session_id.to_string());
        }
    }

    // Role is fixed for the lifetime of the session
    let role = *session.role.get_or_insert(role);
    inner.epoch += 1;
    session.transition(ConnectionState::Connecting);

    let room = session.room_url.clone().map(|url| RoomDescriptor {
        url,
        name: session.room_name.clone().unwrap_or_default(),
    });
    Ok(Some(Attempt { epoch: inner.epoch, role, room }))
}

impl Shared {
    /// Mutate under the lock, then publish the snapshot and notifications
    fn update<R>(&self, f: impl FnOnce(&mut Inner, &mut Vec<SessionEvent>) -> R) -> R {
        let mut inner = self.inner.lock();
        let previous = inner.session.connection_state;
        let mut events = Vec::new();

        let result = f(&mut *inner, &mut events);

        let current = inner.session.connection_state;
        if previous != current {
            info!(
                session_id = inner.session.session_id.as_deref().unwrap_or("-"),
                ?previous,
                ?current,
                "Call state changed"
            );
            events.insert(0, SessionEvent::state_changed(previous, current));
        }
        debug_assert_eq!(inner.session.check_invariants(), Ok(()));

        let snapshot = inner.session.snapshot();
        self.state_tx.send_if_modified(|published| {
            if *published == snapshot {
                return false;
            }
            *published = snapshot;
            true
        });
        for event in events {
            // No subscribers is fine
            let _ = self.event_tx.send(event);
        }
        result
    }

    fn apply_engine_event(&self, generation: u64, event: EngineEvent) {
        self.update(|inner, events| {
            if inner.engine.as_ref().map(MediaEngineHandle::generation) != Some(generation) {
                debug!(generation, event = event.name(), "Ignoring event from superseded engine");
                return;
            }
            let state = inner.session.connection_state;
            if matches!(state, ConnectionState::Idle | ConnectionState::Leaving) {
                debug!(generation, event = event.name(), ?state, "Ignoring event outside an active call");
                return;
            }

            let session = &mut inner.session;
            match event {
                EngineEvent::Joined { local } => {
                    if state == ConnectionState::Error {
                        info!(generation, "Engine rejoined, recovering from error");
                    }
                    events.push(SessionEvent::LocalMediaChanged { video: local.video, audio: local.audio });
                    session.set_local(local);
                    session.is_joined = true;
                    if state != ConnectionState::Connected {
                        session.transition(ConnectionState::Connected);
                    }
                }
                EngineEvent::ParticipantJoined { participant } => {
                    apply_participant(session, participant, true, events);
                }
                EngineEvent::ParticipantUpdated { participant } => {
                    apply_participant(session, participant, false, events);
                }
                EngineEvent::ParticipantLeft { id } => {
                    if session.participants.remove_remote(&id).is_some() {
                        debug!(participant = %id, "Participant left");
                        events.push(SessionEvent::ParticipantLeft { id });
                    }
                }
                EngineEvent::Left => {
                    warn!(generation, "Engine left the meeting");
                    session.is_joined = false;
                    session.is_local_video_enabled = false;
                    session.is_local_audio_enabled = false;
                    session.participants.clear();
                    let message = "left meeting".to_string();
                    session.fail(message.clone());
                    events.push(SessionEvent::Error { message });
                }
                EngineEvent::Error { message } => {
                    // Recorded only; teardown is up to the caller
                    warn!(generation, error = %message, "Engine reported an error");
                    session.fail(message.clone());
                    events.push(SessionEvent::Error { message });
                }
            }
        });
    }
}

fn apply_participant(
    session: &mut CallSession,
    participant: Participant,
    joined: bool,
    events: &mut Vec<SessionEvent>,
) {
    if participant.local || session.participants.is_local(&participant.id) {
        events.push(SessionEvent::LocalMediaChanged { video: participant.video, audio: participant.audio });
        session.set_local(participant);
        return;
    }

    debug!(participant = %participant.id, joined, "Remote participant changed");
    if session.participants.upsert_remote(participant.clone()) {
        events.push(if joined {
            SessionEvent::ParticipantJoined { participant }
        } else {
            SessionEvent::ParticipantUpdated { participant }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LoopbackEngineFactory;
    use async_trait::async_trait;

    struct FixedRoom;

    #[async_trait]
    impl RoomProvisioner for FixedRoom {
        async fn create_room(&self, session_id: &str, _: &str, _: &str) -> SessionResult<RoomDescriptor> {
            Ok(RoomDescriptor { url: format!("https://call/{}", session_id), name: session_id.to_string() })
        }
    }

    fn machine() -> SessionStateMachine {
        let engines = Arc::new(EngineRegistry::new(Arc::new(LoopbackEngineFactory::new())));
        SessionStateMachine::new(SessionConfig::default(), Arc::new(FixedRoom), engines).unwrap()
    }

    #[tokio::test]
    async fn test_events_from_other_generation_are_dropped() {
        let m = machine();
        m.start_call("s1", "agent@x", "cust@y", CallRole::Agent).await.unwrap();
        let generation = m.shared.inner.lock().engine.as_ref().unwrap().generation();

        m.shared.apply_engine_event(
            generation + 1,
            EngineEvent::ParticipantJoined { participant: Participant::remote("ghost") },
        );
        assert!(m.snapshot().remote_participants.is_empty());

        m.shared.apply_engine_event(
            generation,
            EngineEvent::ParticipantJoined { participant: Participant::remote("cust@y") },
        );
        assert_eq!(m.snapshot().remote_participants.len(), 1);
    }

    #[tokio::test]
    async fn test_events_ignored_while_idle() {
        let m = machine();
        m.shared.apply_engine_event(1, EngineEvent::Error { message: "boom".into() });
        assert_eq!(m.snapshot(), CallSnapshot::default());
    }

    #[test]
    fn test_begin_attempt_guards() {
        let mut inner = Inner::default();

        let attempt = begin_attempt(&mut inner, "s1", CallRole::Customer).unwrap().unwrap();
        assert_eq!(attempt.epoch, 1);
        assert!(attempt.room.is_none());
        assert_eq!(inner.session.connection_state, ConnectionState::Connecting);

        // Busy
        assert!(begin_attempt(&mut inner, "s2", CallRole::Agent).unwrap().is_none());

        inner.session.room_url = Some("https://call/s1".into());
        inner.session.room_name = Some("s1".into());
        inner.session.fail("join failed");
        assert!(matches!(
            begin_attempt(&mut inner, "s2", CallRole::Agent),
            Err(SessionError::InvalidState { .. })
        ));

        let retry = begin_attempt(&mut inner, "s1", CallRole::Agent).unwrap().unwrap();
        assert_eq!(retry.epoch, 2);
        assert_eq!(retry.role, CallRole::Customer);
        assert_eq!(retry.room.map(|r| r.url).as_deref(), Some("https://call/s1"));
    }

    #[tokio::test]
    async fn test_update_publishes_only_real_changes() {
        let m = machine();
        let mut rx = m.subscribe();

        m.shared.update(|_, _| {});
        assert!(!rx.has_changed().unwrap());

        m.shared.update(|inner, _| inner.session.transition(ConnectionState::Connecting));
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_connecting);
    }
}
