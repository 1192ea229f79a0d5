//! Error taxonomy shared by the playback, schedule and bus components.
//!
//! Every operation returns a typed `ControlError`; the HTTP layer turns the
//! variant into a status code and never has to inspect message text.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, ControlError>;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Missing video file, device, or persisted map.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("no video loaded")]
    NoMedia,

    /// Operation not valid in the current playback state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The video file exists but is not playable.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Nonzero exit, timeout or IPC failure of an external tool.
    #[error("{tool} failed: {message}")]
    ExternalTool { tool: &'static str, message: String },

    #[error("playback recovery gave up after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// A pending retry was preempted by a newer command (e.g. stop).
    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    /// The CEC adapter or a downstream device did not answer.
    #[error("device unreachable: {0}")]
    DeviceUnreachable(String),
}

impl ControlError {
    pub fn external(tool: &'static str, err: impl std::fmt::Display) -> Self {
        ControlError::ExternalTool {
            tool,
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::NotFound(_) => "NotFound",
            ControlError::NoMedia => "NoMedia",
            ControlError::InvalidState(_) => "InvalidState",
            ControlError::InvalidInput(_) => "InvalidInput",
            ControlError::ValidationFailed(_) => "ValidationFailed",
            ControlError::ExternalTool { .. } => "ExternalToolFailure",
            ControlError::RetryExhausted { .. } => "RetryExhausted",
            ControlError::Cancelled(_) => "Cancelled",
            ControlError::Persistence(_) => "PersistenceFailure",
            ControlError::DeviceUnreachable(_) => "DeviceUnreachable",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ControlError::NotFound(_) | ControlError::NoMedia => StatusCode::NOT_FOUND,
            ControlError::InvalidState(_)
            | ControlError::InvalidInput(_)
            | ControlError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            ControlError::Cancelled(_) => StatusCode::CONFLICT,
            ControlError::ExternalTool { .. }
            | ControlError::RetryExhausted { .. }
            | ControlError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ControlError::DeviceUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
