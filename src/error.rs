//! Error taxonomy for the job supervisor
//!
//! Every user-facing failure is delivered as `{success: false, message}`;
//! internal details stay in the logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Rejected before any process is spawned
    #[error("{0}")]
    InvalidSettings(String),

    /// Per-owner live-job admission control
    #[error("a live trading job is already running for this owner")]
    AlreadyRunning,

    #[error("job not found")]
    NotFound,

    /// Live trading requires stored exchange credentials
    #[error("exchange API credentials are not configured")]
    MissingCredentials,

    #[error("failed to launch external process: {0}")]
    Launch(#[from] std::io::Error),

    /// Result payload missing or malformed despite a clean exit
    #[error("result extraction failed: {0}")]
    Extraction(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl SupervisorError {
    fn status_code(&self) -> StatusCode {
        match self {
            SupervisorError::InvalidSettings(_)
            | SupervisorError::AlreadyRunning
            | SupervisorError::MissingCredentials => StatusCode::BAD_REQUEST,
            SupervisorError::NotFound => StatusCode::NOT_FOUND,
            SupervisorError::Launch(_)
            | SupervisorError::Extraction(_)
            | SupervisorError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for SupervisorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal errors get a generic message on the wire
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal supervisor error");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}
