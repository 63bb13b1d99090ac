use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SessionError, SessionResult};

/// Room provisioning service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Endpoint that accepts the room creation POST
    pub endpoint: String,
    /// HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Bearer token sent with each request (optional)
    pub auth_token: Option<String>,
    /// User agent string
    pub user_agent: String,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/api/video-call/create-room".to_string(),
            request_timeout_ms: 15_000,
            auth_token: None,
            user_agent: format!("livecall-call-core/{}", crate::VERSION),
        }
    }
}

impl ProvisioningConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Configuration for a call session state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Room provisioning settings
    pub provisioning: ProvisioningConfig,
    /// Capacity of the engine event channel drained by the event bridge
    pub event_channel_capacity: usize,
    /// Upper bound on join in milliseconds, `None` waits for the engine indefinitely
    pub join_timeout_ms: Option<u64>,
}

impl SessionConfig {
    /// Create a new session configuration with defaults
    pub fn new() -> Self {
        Self {
            provisioning: ProvisioningConfig::default(),
            event_channel_capacity: 256,
            join_timeout_ms: None,
        }
    }

    /// Set the provisioning endpoint
    pub fn with_provisioning_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.provisioning.endpoint = endpoint.into();
        self
    }

    /// Set the bearer token for the provisioning service
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.provisioning.auth_token = Some(token.into());
        self
    }

    /// Set the provisioning request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.provisioning.request_timeout_ms = millis(timeout);
        self
    }

    /// Set the engine event channel capacity
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Bound how long `start_call` waits for the engine to join
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout_ms = Some(millis(timeout));
        self
    }

    pub fn join_timeout(&self) -> Option<Duration> {
        self.join_timeout_ms.map(Duration::from_millis)
    }

    /// Check the configuration before a state machine is built from it
    pub fn validate(&self) -> SessionResult<()> {
        let endpoint = Url::parse(&self.provisioning.endpoint).map_err(|e| {
            SessionError::invalid_configuration("provisioning.endpoint", e.to_string())
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(SessionError::invalid_configuration(
                "provisioning.endpoint",
                format!("unsupported scheme '{}'", endpoint.scheme()),
            ));
        }
        if self.provisioning.request_timeout_ms == 0 {
            return Err(SessionError::invalid_configuration(
                "provisioning.request_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(SessionError::invalid_configuration(
                "event_channel_capacity",
                "must be greater than zero",
            ));
        }
        if self.join_timeout_ms == Some(0) {
            return Err(SessionError::invalid_configuration(
                "join_timeout_ms",
                "must be greater than zero when set",
            ));
        }
        Ok(())
    }
}

/// Whole milliseconds, saturating
fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}
