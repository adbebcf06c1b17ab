use crate::session::SessionError;
use arthuron_core::{ConfigError, IntakeError, RelayState};
use arthuron_voice::RelayStatsSnapshot;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Body of `POST /tts/chunk`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRequest {
    pub text: String,
}

/// Success body of the intake endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

/// Query of `GET /session`. Values stay raw so bad numbers fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionQuery {
    pub voice: Option<String>,
    pub speed: Option<String>,
    pub temp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub started_at: String,
    pub relay: RelayHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayHealth {
    pub configured: bool,
    #[serde(default)]
    pub state: Option<RelayState>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub buffered: usize,
    #[serde(default)]
    pub dropped_frames: u64,
    #[serde(default)]
    pub connect_attempts: u64,
    #[serde(default)]
    pub connections: u64,
    #[serde(default)]
    pub commands_sent: u64,
    #[serde(default)]
    pub keepalives_sent: u64,
    #[serde(default)]
    pub frames_received: u64,
}

impl RelayHealth {
    pub fn unconfigured(error: &ConfigError) -> Self {
        Self {
            configured: false,
            state: None,
            error: Some(error.to_string()),
            buffered: 0,
            dropped_frames: 0,
            connect_attempts: 0,
            connections: 0,
            commands_sent: 0,
            keepalives_sent: 0,
            frames_received: 0,
        }
    }

    pub fn running(state: RelayState, buffered: usize, dropped_frames: u64, stats: RelayStatsSnapshot) -> Self {
        Self {
            configured: true,
            state: Some(state),
            error: None,
            buffered,
            dropped_frames,
            connect_attempts: stats.connect_attempts,
            connections: stats.connections,
            commands_sent: stats.commands_sent,
            keepalives_sent: stats.keepalives_sent,
            frames_received: stats.frames_received,
        }
    }
}

/// Every user-visible failure of the HTTP surface.
#[derive(Debug)]
pub enum ApiError {
    /// Request body that is not a valid `ChunkRequest`.
    Body(JsonRejection),
    Intake(IntakeError),
    Config(ConfigError),
    Session(SessionError),
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::Body(e)
    }
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        Self::Intake(e)
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Body(rejection) => (
                rejection.status(),
                json!({ "error": "invalid request body", "details": rejection.body_text() }),
            ),
            ApiError::Intake(e @ IntakeError::EmptyText) => {
                (StatusCode::BAD_REQUEST, json!({ "error": e.to_string() }))
            }
            ApiError::Intake(e) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": e.to_string() }))
            }
            ApiError::Config(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() }))
            }
            ApiError::Session(SessionError::MissingKey) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": SessionError::MissingKey.to_string() }),
            ),
            ApiError::Session(SessionError::Upstream { status, details }) => {
                // reqwest and axum use different `http` majors
                let code = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
                (
                    code,
                    json!({
                        "error": "OpenAI API error",
                        "status": status.as_u16(),
                        "details": details,
                    }),
                )
            }
            ApiError::Session(e @ SessionError::Transport(_)) => {
                tracing::error!("Session negotiation failed: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    json!({ "error": "OpenAI API unreachable", "details": e.to_string() }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
