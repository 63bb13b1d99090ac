//! Error types and handling for the call-core library
//!
//! This module defines all error types that can occur while orchestrating a
//! live call session.
//!
//! # Error Categories
//!
//! - **Provisioning Errors** - The room service was unreachable or rejected the request
//! - **Join Errors** - The media engine refused or failed to join a provisioned room
//! - **Engine Errors** - Asynchronous failures reported after a successful join
//! - **State Errors** - Invalid operation for the current connection state
//! - **Configuration Errors** - Invalid settings, can't recover without fixing config
//!
//! This layer never retries. `is_recoverable()` is a hint for the UI or
//! whoever issues commands, which may decide to start the call again.
//!
//! ```rust,no_run
//! # use livecall_call_core::{SessionStateMachine, SessionError, CallRole};
//! # use std::sync::Arc;
//! # async fn example(machine: Arc<SessionStateMachine>) {
//! match machine.start_call("s1", "agent@example.com", "cust@example.com", CallRole::Agent).await {
//!     Ok(()) => println!("call connected"),
//!     Err(SessionError::ProvisioningFailed { reason, .. }) => {
//!         eprintln!("Could not create room: {}", reason);
//!     }
//!     Err(e) => eprintln!("Call failed ({}): {}", e.category(), e),
//! }
//! # }
//! ```

use thiserror::Error;

use crate::session::ConnectionState;

/// Result type alias for call-core operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Error types for call session operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Room creation failed (network or backend rejection)
    #[error("Room provisioning failed: {reason}")]
    ProvisioningFailed {
        reason: String,
        /// HTTP status returned by the service, if a response was received
        status: Option<u16>,
    },

    /// The engine refused or failed to join a provisioned room
    #[error("Join failed: {reason}")]
    JoinFailed { reason: String },

    /// Failure reported by the engine outside of join
    #[error("Engine error: {reason}")]
    EngineError { reason: String },

    #[error("Invalid state for {operation}: current state is {state:?}")]
    InvalidState {
        operation: String,
        state: ConnectionState,
    },

    #[error("Missing required argument: {field}")]
    MissingArgument { field: String },

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Another session already holds the process-wide engine
    #[error("Media engine is in use by session {owner}")]
    EngineBusy { owner: String },

    /// The operation was superseded by `end_call()` while it was suspended
    #[error("Operation cancelled by end_call")]
    Cancelled,

    #[error("Operation timeout after {duration_ms}ms")]
    OperationTimeout { duration_ms: u64 },
}

impl SessionError {
    /// Create a provisioning failed error
    pub fn provisioning_failed(reason: impl Into<String>) -> Self {
        Self::ProvisioningFailed { reason: reason.into(), status: None }
    }

    /// Create a join failed error
    pub fn join_failed(reason: impl Into<String>) -> Self {
        Self::JoinFailed { reason: reason.into() }
    }

    /// Create an engine error
    pub fn engine_error(reason: impl Into<String>) -> Self {
        Self::EngineError { reason: reason.into() }
    }

    /// Create a missing argument error
    pub fn missing_argument(field: impl Into<String>) -> Self {
        Self::MissingArgument { field: field.into() }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration { field: field.into(), reason: reason.into() }
    }

    /// Check if a later, user-initiated attempt could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            SessionError::ProvisioningFailed { status, .. } => {
                // No response at all, or a server-side failure
                status.map_or(true, |code| code >= 500)
            }
            SessionError::JoinFailed { .. } |
            SessionError::EngineError { .. } |
            SessionError::EngineBusy { .. } |
            SessionError::OperationTimeout { .. } => true,

            SessionError::InvalidState { .. } |
            SessionError::MissingArgument { .. } |
            SessionError::InvalidConfiguration { .. } |
            SessionError::Cancelled => false,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            SessionError::ProvisioningFailed { .. } => "provisioning",
            SessionError::JoinFailed { .. } => "join",
            SessionError::EngineError { .. } |
            SessionError::EngineBusy { .. } => "engine",
            SessionError::InvalidState { .. } |
            SessionError::MissingArgument { .. } => "state",
            SessionError::InvalidConfiguration { .. } => "configuration",
            SessionError::Cancelled |
            SessionError::OperationTimeout { .. } => "system",
        }
    }
}
