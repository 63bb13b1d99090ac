//! Process-wide engine registry
//!
//! At most one engine instance exists per registry. Creation is
//! create-if-absent under an async lock: the first caller constructs the
//! engine, concurrent callers wait and then reuse it. The registry also
//! leases the engine to a single owning session so two state machines can
//! never drive the same engine.
//!
//! The registry is an ordinary value shared by `Arc`, not ambient global
//! state; construct one per process and hand it to every state machine.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{MediaEngine, MediaEngineHandle};
use crate::error::{SessionError, SessionResult};

/// Constructs engine instances
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self) -> SessionResult<Arc<dyn MediaEngine>>;
}

pub struct EngineRegistry {
    factory: Arc<dyn EngineFactory>,
    slot: Mutex<Slot>,
    next_generation: AtomicU64,
}

/// The registered engine and the session leasing it, guarded together
#[derive(Default)]
struct Slot {
    handle: Option<MediaEngineHandle>,
    owner: Option<Uuid>,
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let owner = self.slot.try_lock().ok().and_then(|slot| slot.owner);
        f.debug_struct("EngineRegistry")
            .field("owner", &owner)
            .field("next_generation", &self.next_generation.load(Ordering::SeqCst))
            .finish()
    }
}

impl EngineRegistry {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            slot: Mutex::new(Slot::default()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Lease the engine to `owner`, creating it if absent
    ///
    /// Fails with `EngineBusy` while another owner holds the lease. The
    /// lease is taken only once the engine is registered, so a cancelled
    /// or failed create leaves the registry unowned.
    pub async fn acquire(&self, owner: Uuid) -> SessionResult<MediaEngineHandle> {
        let mut slot = self.slot.lock().await;
        if let Some(other) = slot.owner.filter(|other| *other != owner) {
            warn!(%owner, holder = %other, "Engine requested while leased to another session");
            return Err(SessionError::EngineBusy { owner: other.to_string() });
        }

        let handle = self.ensure(&mut slot).await?;
        slot.owner = Some(owner);
        Ok(handle)
    }

    /// Return the existing engine or construct the single instance
    ///
    /// Does not take the lease.
    pub async fn get_or_create(&self) -> SessionResult<MediaEngineHandle> {
        let mut slot = self.slot.lock().await;
        self.ensure(&mut slot).await
    }

    async fn ensure(&self, slot: &mut Slot) -> SessionResult<MediaEngineHandle> {
        if let Some(handle) = slot.handle.as_ref() {
            debug!(generation = handle.generation(), "Reusing existing engine");
            return Ok(handle.clone());
        }

        let engine = self.factory.create().await?;
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let handle = MediaEngineHandle::new(generation, engine);
        info!(generation, "Media engine created");
        slot.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Currently registered engine, if any
    pub async fn current(&self) -> Option<MediaEngineHandle> {
        self.slot.lock().await.handle.clone()
    }

    /// Session currently holding the lease
    pub async fn owner(&self) -> Option<Uuid> {
        self.slot.lock().await.owner
    }

    /// Unregister and destroy the engine of `generation` and end `owner`'s lease
    ///
    /// Only the lease holder can release, and only the engine it was
    /// handed. Anything else is a no-op. The slot is cleared before
    /// `destroy()` runs, so a failing destroy never leaves a dead engine
    /// registered.
    pub async fn release(&self, owner: Uuid, generation: u64) -> SessionResult<()> {
        let taken = {
            let mut slot = self.slot.lock().await;
            if slot.owner != Some(owner) {
                debug!(%owner, generation, "Release by a session not holding the lease ignored");
                return Ok(());
            }
            match slot.handle.as_ref().map(MediaEngineHandle::generation) {
                Some(current) if current == generation => {
                    slot.owner = None;
                    slot.handle.take()
                }
                Some(current) => {
                    debug!(generation, current, "Stale engine release ignored");
                    return Ok(());
                }
                None => {
                    slot.owner = None;
                    None
                }
            }
        };

        match taken {
            Some(handle) => {
                let result = handle.destroy().await;
                info!(generation, "Media engine released");
                result
            }
            None => {
                debug!(generation, "Engine already released");
                Ok(())
            }
        }
    }

    /// End `owner`'s lease without destroying the engine
    ///
    /// Best effort for callers that cannot await: does nothing while the
    /// registry is busy creating or releasing.
    pub fn try_clear_owner(&self, owner: Uuid) -> bool {
        match self.slot.try_lock() {
            Ok(mut slot) if slot.owner == Some(owner) => {
                slot.owner = None;
                true
            }
            _ => false,
        }
    }
}
