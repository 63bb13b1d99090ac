//! Event bridge between a media engine and the state machine
//!
//! The bridge is the only component that touches the engine's raw event
//! subscription. It subscribes a bounded channel, drains it from a single
//! dispatcher task and hands each event, in delivery order and tagged with
//! the engine generation, to the state machine.
//!
//! Dropping the bridge removes the subscription and stops the dispatcher, so
//! a replaced or destroyed engine can no longer reach the session.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::engine::{EngineEvent, MediaEngineHandle, SubscriptionId};

pub struct EventBridge {
    engine: MediaEngineHandle,
    subscription: SubscriptionId,
    dispatcher: JoinHandle<()>,
}

impl std::fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBridge")
            .field("generation", &self.engine.generation())
            .field("subscription", &self.subscription)
            .finish()
    }
}

impl EventBridge {
    /// Subscribe to `engine` and start dispatching its events to `apply`
    ///
    /// `apply` receives the engine generation with every event and runs on
    /// the dispatcher task; it must not block.
    pub fn attach<F>(engine: MediaEngineHandle, capacity: usize, apply: F) -> Self
    where
        F: Fn(u64, EngineEvent) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(capacity);
        let subscription = engine.subscribe(tx);
        let generation = engine.generation();

        let dispatcher = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                trace!(generation, event = event.name(), "Dispatching engine event");
                apply(generation, event);
            }
            debug!(generation, "Engine event stream closed");
        });

        debug!(generation, %subscription, "Event bridge attached");
        Self { engine, subscription, dispatcher }
    }

    pub fn generation(&self) -> u64 {
        self.engine.generation()
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.engine.unsubscribe(self.subscription);
        self.dispatcher.abort();
        debug!(generation = self.engine.generation(), "Event bridge detached");
    }
}
