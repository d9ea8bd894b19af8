use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::session::RegistryError;
use crate::window::WindowError;

/// Structured error type for all API handlers.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message. Implements [`IntoResponse`] so handlers can
/// return `Result<T, ApiError>` directly.
#[derive(Debug)]
pub enum ApiError {
    /// 404 - No open window with this id.
    SessionNotFound(String),
    /// 404 - The window has no entity with this id.
    EntityNotFound { kind: &'static str, id: String },
    /// 400 - Malformed or invalid request.
    InvalidRequest(String),
    /// 400 - Arguments failed validation.
    InvalidArgument(String),
    /// 400 - An inbound frontend message could not be dispatched.
    Routing(String),
    /// 502 - The frontend could not be reached.
    TransportFailed(String),
    /// 410 - The window was closed while the request was in flight.
    SessionClosed(String),
    /// 503 - The registry is at capacity.
    MaxSessionsReached,
    /// 500 - Catch-all internal error.
    InternalError(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::EntityNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::Routing(_) => StatusCode::BAD_REQUEST,
            ApiError::TransportFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::SessionClosed(_) => StatusCode::GONE,
            ApiError::MaxSessionsReached => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a machine-readable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::SessionNotFound(_) => "session_not_found",
            ApiError::EntityNotFound { .. } => "entity_not_found",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::InvalidArgument(_) => "invalid_argument",
            ApiError::Routing(_) => "routing_error",
            ApiError::TransportFailed(_) => "transport_failed",
            ApiError::SessionClosed(_) => "session_closed",
            ApiError::MaxSessionsReached => "max_sessions_reached",
            ApiError::InternalError(_) => "internal_error",
        }
    }

    /// Returns a human-readable error message.
    pub fn message(&self) -> String {
        match self {
            ApiError::SessionNotFound(id) => format!("Window not found: {}.", id),
            ApiError::EntityNotFound { kind, id } => format!("No {} exists with id '{}'.", kind, id),
            ApiError::InvalidRequest(detail) => format!("Invalid request: {}.", detail),
            ApiError::InvalidArgument(detail) => format!("Invalid argument: {}.", detail),
            ApiError::Routing(detail) => format!("Could not route message: {}.", detail),
            ApiError::TransportFailed(detail) => {
                format!("Frontend delivery failed: {}. The message stays queued.", detail)
            }
            ApiError::SessionClosed(id) => format!("Window is closed: {}.", id),
            ApiError::MaxSessionsReached => {
                "Maximum number of windows reached. Close one and retry.".to_string()
            }
            ApiError::InternalError(detail) => format!("Internal error: {}.", detail),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => ApiError::SessionNotFound(id),
            RegistryError::MaxSessionsReached => ApiError::MaxSessionsReached,
            err @ RegistryError::CloseFailed { .. } => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<WindowError> for ApiError {
    fn from(err: WindowError) -> Self {
        match err {
            WindowError::Validation(e) => ApiError::InvalidArgument(e.to_string()),
            WindowError::Transport(e) => ApiError::TransportFailed(e.to_string()),
            WindowError::Routing(e) => ApiError::Routing(e.to_string()),
            WindowError::UnknownEntity { kind, id } => ApiError::EntityNotFound { kind, id },
            WindowError::Closed(id) => ApiError::SessionClosed(id),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            tracing::warn!(code = self.code(), "{}", self.message());
        }
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}
