//! Room provisioning
//!
//! Turns a (session, local identity, remote identity) triple into a room the
//! media engine can join, by calling an external HTTP service:
//!
//! ```text
//! POST <endpoint>
//! { "sessionId": "...", "userEmail": "...", "targetUserEmail": "..." }
//!
//! 200 { "url": "...", "name": "..." }
//!  or { "data": { "url": "...", "name": "..." } }
//! ```
//!
//! Failures are reported, never retried here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::ProvisioningConfig;
use crate::error::{SessionError, SessionResult};

/// Longest slice of an error body kept in the error message
const MAX_ERROR_BODY: usize = 200;

/// Identity of a provisioned room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDescriptor {
    pub url: String,
    pub name: String,
}

/// Creates call rooms
///
/// Implementations send exactly one request per call. Whether a repeated
/// request for the same `session_id` yields the same room is up to the
/// remote service; callers must not rely on it and must provision at most
/// once per session.
#[async_trait]
pub trait RoomProvisioner: Send + Sync {
    async fn create_room(
        &self,
        session_id: &str,
        local_identity: &str,
        remote_identity: &str,
    ) -> SessionResult<RoomDescriptor>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest<'a> {
    session_id: &'a str,
    user_email: &'a str,
    target_user_email: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CreateRoomResponse {
    Nested { data: RoomDescriptor },
    Flat(RoomDescriptor),
}

impl CreateRoomResponse {
    fn into_descriptor(self) -> RoomDescriptor {
        match self {
            CreateRoomResponse::Nested { data } => data,
            CreateRoomResponse::Flat(room) => room,
        }
    }
}

/// HTTP client for the room provisioning service
#[derive(Debug, Clone)]
pub struct RoomProvisioningClient {
    config: ProvisioningConfig,
    http_client: reqwest::Client,
}

impl RoomProvisioningClient {
    pub fn new(config: ProvisioningConfig) -> SessionResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SessionError::invalid_configuration("provisioning", e.to_string()))?;

        Ok(Self { config, http_client })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

fn require(field: &str, value: &str) -> SessionResult<()> {
    if value.trim().is_empty() {
        return Err(SessionError::missing_argument(field));
    }
    Ok(())
}

#[async_trait]
impl RoomProvisioner for RoomProvisioningClient {
    async fn create_room(
        &self,
        session_id: &str,
        local_identity: &str,
        remote_identity: &str,
    ) -> SessionResult<RoomDescriptor> {
        require("session_id", session_id)?;
        require("local_identity", local_identity)?;
        require("remote_identity", remote_identity)?;

        debug!(session_id, endpoint = %self.config.endpoint, "Requesting call room");

        let body = CreateRoomRequest {
            session_id,
            user_email: local_identity,
            target_user_email: remote_identity,
        };
        let mut request = self.http_client.post(&self.config.endpoint).json(&body);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            error!(session_id, error = %e, "Room provisioning request failed");
            SessionError::provisioning_failed(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail: String = text.chars().take(MAX_ERROR_BODY).collect();
            error!(session_id, status = status.as_u16(), body = %detail, "Room provisioning rejected");
            return Err(SessionError::ProvisioningFailed {
                reason: if detail.is_empty() {
                    format!("service returned {}", status)
                } else {
                    format!("service returned {}: {}", status, detail)
                },
                status: Some(status.as_u16()),
            });
        }

        let room = response
            .json::<CreateRoomResponse>()
            .await
            .map_err(|e| SessionError::ProvisioningFailed {
                reason: format!("invalid room response: {}", e),
                status: Some(status.as_u16()),
            })?
            .into_descriptor();

        if room.url.trim().is_empty() {
            return Err(SessionError::ProvisioningFailed {
                reason: "room response has an empty url".to_string(),
                status: Some(status.as_u16()),
            });
        }

        info!(session_id, room_url = %room.url, room_name = %room.name, "Call room provisioned");
        Ok(room)
    }
}
