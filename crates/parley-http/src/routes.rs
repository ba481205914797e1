//! HTTP route handlers for agent control.
//!
//! `POST /start` and `POST /stop` drive the supervisor; `GET /status` reports
//! its state. Control responses always carry the status after the request
//! was handled, so a client can render it without a second round trip.

use axum::{body::Bytes, extract::State, http::StatusCode, response::Json};
use parley_core::config::AgentConfig;
use parley_core::supervisor::{ProcessStatus, SupervisorError};
use serde::Serialize;
use std::sync::Arc;

use super::SharedState;

/// Response format for control requests.
#[derive(Serialize)]
pub struct ControlResponse {
    /// Whether the request succeeded.
    pub success: bool,
    pub message: String,
    /// Supervisor status after the request.
    pub status: ProcessStatus,
    /// Error message (if failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    fn ok(message: &str, status: ProcessStatus) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            status,
            error: None,
        }
    }

    fn failed(message: &str, status: ProcessStatus, error: String) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            status,
            error: Some(error),
        }
    }
}

type ControlResult = (StatusCode, Json<ControlResponse>);

/// HTTP status for a supervisor error.
fn error_status(error: &SupervisorError) -> StatusCode {
    match error {
        SupervisorError::AlreadyRunning | SupervisorError::NotRunning => StatusCode::CONFLICT,
        SupervisorError::SpawnFailure(_) | SupervisorError::UnexpectedExit(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Parse a start request body. An empty body selects the defaults.
fn parse_config(body: &[u8]) -> Result<AgentConfig, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(AgentConfig::default());
    }
    serde_json::from_slice(body)
}

/// Handler for POST /start
pub async fn start_handler(State(state): State<Arc<SharedState>>, body: Bytes) -> ControlResult {
    let config = match parse_config(&body) {
        Ok(config) => config,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ControlResponse::failed(
                    "Invalid start request",
                    state.supervisor.status(),
                    e.to_string(),
                )),
            );
        }
    };

    log::debug!("HTTP start: voice {}, model {}", config.voice, config.model);

    match state.supervisor.start(config).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ControlResponse::ok("Agent started", state.supervisor.status())),
        ),
        Err(e) => {
            let message = match e {
                SupervisorError::AlreadyRunning => "Agent is already running",
                _ => "Agent failed to start",
            };
            (
                error_status(&e),
                Json(ControlResponse::failed(
                    message,
                    state.supervisor.status(),
                    e.to_string(),
                )),
            )
        }
    }
}

/// Handler for POST /stop
pub async fn stop_handler(State(state): State<Arc<SharedState>>) -> ControlResult {
    log::debug!("HTTP stop");

    match state.supervisor.stop().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ControlResponse::ok("Agent stopped", state.supervisor.status())),
        ),
        Err(e) => (
            error_status(&e),
            Json(ControlResponse::failed(
                "Agent was not running",
                state.supervisor.status(),
                e.to_string(),
            )),
        ),
    }
}

/// Handler for GET /status
pub async fn status_handler(State(state): State<Arc<SharedState>>) -> Json<ProcessStatus> {
    Json(state.supervisor.status())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::config::Voice;
    use parley_core::shell::AgentExit;

    #[test]
    fn control_response_serialization() {
        let response = ControlResponse::ok("Agent stopped", ProcessStatus::default());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "Agent stopped");
        assert_eq!(json["status"]["state"], "idle");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn control_response_error_serialization() {
        let response = ControlResponse::failed(
            "Agent is already running",
            ProcessStatus::default(),
            "Agent already running".to_string(),
        );
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("\"error\":\"Agent already running\""));
    }

    #[test]
    fn conflicts_map_to_409() {
        assert_eq!(error_status(&SupervisorError::AlreadyRunning), StatusCode::CONFLICT);
        assert_eq!(error_status(&SupervisorError::NotRunning), StatusCode::CONFLICT);
    }

    #[test]
    fn failures_map_to_500() {
        assert_eq!(
            error_status(&SupervisorError::SpawnFailure("no such file".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            error_status(&SupervisorError::UnexpectedExit(AgentExit::unknown())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn empty_body_selects_defaults() {
        assert_eq!(parse_config(b"").unwrap(), AgentConfig::default());
        assert_eq!(parse_config(b"  \n").unwrap(), AgentConfig::default());
    }

    #[test]
    fn body_is_parsed() {
        let config =
            parse_config(br#"{"system_prompt": "Be brief", "voice": "Kore", "model": "m"}"#).unwrap();
        assert_eq!(config, AgentConfig::new("Be brief", Voice::Kore, "m"));
    }

    #[test]
    fn malformed_body_is_rejected() {
        assert!(parse_config(b"{not json").is_err());
        assert!(parse_config(br#"{"voice": 3}"#).is_err());
    }
}
