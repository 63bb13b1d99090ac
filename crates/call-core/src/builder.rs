//! Session builder
//!
//! Fluent construction of a [`SessionStateMachine`]. The builder fills in
//! the HTTP [`RoomProvisioningClient`] from the configuration unless a
//! custom [`RoomProvisioner`] is supplied. An engine registry (or a factory
//! to build one from) is always required; share one registry between state
//! machines of the same process.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use livecall_call_core::{LoopbackEngineFactory, SessionBuilder};
//!
//! # tokio_test::block_on(async {
//! let session = SessionBuilder::new()
//!     .provisioning_endpoint("https://api.example.com/video-call/create-room")
//!     .join_timeout(Duration::from_secs(30))
//!     .engine_factory(Arc::new(LoopbackEngineFactory::new()))
//!     .build()
//!     .expect("Failed to build session");
//!
//! assert!(!session.snapshot().is_busy);
//! # })
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::engine::{EngineFactory, EngineRegistry};
use crate::error::{SessionError, SessionResult};
use crate::machine::SessionStateMachine;
use crate::provisioning::{RoomProvisioner, RoomProvisioningClient};

/// Fluent builder for [`SessionStateMachine`]
#[derive(Default)]
pub struct SessionBuilder {
    config: SessionConfig,
    provisioner: Option<Arc<dyn RoomProvisioner>>,
    engines: Option<Arc<EngineRegistry>>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provisioning_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config = self.config.with_provisioning_endpoint(endpoint);
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config = self.config.with_auth_token(token);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_request_timeout(timeout);
        self
    }

    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_join_timeout(timeout);
        self
    }

    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.with_event_channel_capacity(capacity);
        self
    }

    /// Use a custom room provisioner instead of the HTTP client
    pub fn provisioner(mut self, provisioner: Arc<dyn RoomProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Share an existing engine registry
    pub fn engine_registry(mut self, engines: Arc<EngineRegistry>) -> Self {
        self.engines = Some(engines);
        self
    }

    /// Build a dedicated registry around `factory`
    pub fn engine_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.engines = Some(Arc::new(EngineRegistry::new(factory)));
        self
    }

    pub fn build(self) -> SessionResult<Arc<SessionStateMachine>> {
        self.config.validate()?;

        let engines = self.engines.ok_or_else(|| {
            SessionError::invalid_configuration("engine", "no engine registry or factory configured")
        })?;
        let provisioner = match self.provisioner {
            Some(provisioner) => provisioner,
            None => Arc::new(RoomProvisioningClient::new(self.config.provisioning.clone())?),
        };

        let machine = SessionStateMachine::new(self.config, provisioner, engines)?;
        tracing::debug!(id = %machine.id(), "Session state machine built");
        Ok(Arc::new(machine))
    }
}
