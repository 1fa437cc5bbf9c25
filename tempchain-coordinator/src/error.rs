//! Error handling for the coordinator
//!
//! Errors raised at the HTTP edge turn into JSON responses; the rest are
//! reported on the operator console.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tempchain_core::agent_registry::AgentError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Connection attempt without an `addr` query parameter
    #[error("Missing agent identifier")]
    MissingAgentId,

    /// The coordinator event loop is no longer running
    #[error("Coordinator stopped")]
    Stopped,

    /// Operator input ended
    #[error("Input closed")]
    InputClosed,

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Self::MissingAgentId => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::Agent(AgentError::AgentNotFound { agent_id }) => (
                StatusCode::NOT_FOUND,
                format!("Agent not found: {}", agent_id),
            ),
            Self::Agent(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Self::Stopped => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = self.status_and_message();

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::MissingAgentId.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        let not_found = AppError::Agent(AgentError::AgentNotFound {
            agent_id: "0xabc".to_string(),
        });
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Stopped.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
