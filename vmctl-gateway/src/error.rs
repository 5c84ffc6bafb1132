//! Error types for the gateway crate.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use vmctl_core::{CoreError, VmId};
use vmctl_engine::{CaptureError, ControlError, ControllerError, SupervisorError};

/// Errors that can occur during gateway request handling.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// An error propagated from the engine layer.
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// A console round trip failed.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// No configuration is registered under this id.
    #[error("VM not found: {0}")]
    VmNotFound(VmId),

    /// The architecture of a running machine cannot change.
    #[error("VM {0} is running; stop it before changing its architecture")]
    ArchitectureLocked(VmId),

    /// A path segment or body field failed validation.
    #[error(transparent)]
    InvalidInput(#[from] CoreError),

    /// The request body is malformed or contains invalid values.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::VmNotFound(_) => StatusCode::NOT_FOUND,
            Self::ArchitectureLocked(_) => StatusCode::CONFLICT,
            Self::InvalidInput(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Control(e) => control_status(e),
            Self::Controller(ControllerError::Supervisor(e)) => supervisor_status(e),
            Self::Controller(ControllerError::Capture(e)) => capture_status(e),
            Self::Controller(ControllerError::Control(e)) => control_status(e),
            Self::Controller(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn supervisor_status(e: &SupervisorError) -> StatusCode {
    match e {
        SupervisorError::AlreadyRunning(_) | SupervisorError::NotRunning(_) | SupervisorError::StopInProgress(_) => {
            StatusCode::CONFLICT
        }
        SupervisorError::BinaryNotFound { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn capture_status(e: &CaptureError) -> StatusCode {
    match e {
        CaptureError::DuplicateName(_) => StatusCode::CONFLICT,
        CaptureError::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CaptureError::Name(_) => StatusCode::BAD_REQUEST,
        CaptureError::ToolUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        CaptureError::Control(c) => control_status(c),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn control_status(e: &ControlError) -> StatusCode {
    match e {
        ControlError::SocketNotFound { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ControlError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, error = %self, "request failed");
        }
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}
