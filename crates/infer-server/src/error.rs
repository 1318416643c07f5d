//! Error taxonomy for the gateway and its mapping to HTTP responses.

use std::time::Duration;

use axum::{
    extract::rejection::{FormRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use infer_engine::EngineError;
use serde_json::json;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("unknown model: {0:?}")]
    UnknownModel(String),

    #[error("too many opened inference sessions (max {max}), please come back later")]
    CapacityExceeded { max: usize },

    #[error("session {0:?} expired or does not exist")]
    SessionNotFound(String),

    #[error("timed out after {waited:?} waiting for session {session}")]
    Timeout { session: String, waited: Duration },

    #[error("generation failed: {0}")]
    Generation(#[from] EngineError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Stable machine-readable name reported as `kind` on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::UnknownModel(_) => "unknown_model",
            ServerError::CapacityExceeded { .. } => "capacity_exceeded",
            ServerError::SessionNotFound(_) => "session_not_found",
            ServerError::Timeout { .. } => "timeout",
            ServerError::Generation(_) => "generation_failure",
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownModel(_) | ServerError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Generation(EngineError::Tokenization(_))
            | ServerError::Generation(EngineError::InvalidParams(_)) => StatusCode::BAD_REQUEST,
            ServerError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ServerError::Generation(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<QueryRejection> for ServerError {
    fn from(rejection: QueryRejection) -> Self {
        ServerError::InvalidRequest(rejection.body_text())
    }
}

impl From<FormRejection> for ServerError {
    fn from(rejection: FormRejection) -> Self {
        ServerError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(kind = self.kind(), error = %self, "request failed");
        } else {
            tracing::debug!(kind = self.kind(), error = %self, "request rejected");
        }

        let body = Json(json!({
            "ok": false,
            "error": self.to_string(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}
