//! Centralized error types for the Boothcast core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::agent::CollaboratorError;
use crate::game::board::ReduceError;
use crate::persist::PersistError;
use crate::watch::WatchError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for CollaboratorError {
    fn code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "collaborator_timeout",
            Self::Http { .. } => "collaborator_http_error",
            Self::Transport(_) => "collaborator_transport_error",
            Self::Malformed(_) => "collaborator_malformed_output",
        }
    }
}

impl ErrorCode for ReduceError {
    fn code(&self) -> &'static str {
        match self {
            Self::OutOfOrder { .. } => "snapshot_out_of_order",
            Self::Corrupt(_) => "snapshot_corrupt",
        }
    }
}

impl ErrorCode for PersistError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "persistence_io_failed",
            Self::Encode(_) => "persistence_encode_failed",
            Self::Decode { .. } => "persistence_decode_failed",
        }
    }
}

impl ErrorCode for WatchError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "watch_backend_failed",
            Self::IngestDirMissing(_) => "ingest_dir_missing",
        }
    }
}

/// Application-wide error type for the Boothcast server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum BoothError {
    /// Requested game session does not exist.
    #[error("Game not found: {0}")]
    GameNotFound(String),

    /// A game session already exists for this game id.
    #[error("Game already running: {0}")]
    GameAlreadyRunning(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Snapshot ingest failed (watcher or filesystem issues).
    #[error("Ingest failed: {0}")]
    Ingest(String),

    /// External collaborator (LLM/TTS) failed beyond the retry budget.
    #[error("Collaborator failed: {0}")]
    Collaborator(String),

    /// Durable artifact write or recovery failed.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error (missing or inconsistent settings).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BoothError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::GameNotFound(_) => "game_not_found",
            Self::GameAlreadyRunning(_) => "game_already_running",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Ingest(_) => "ingest_failed",
            Self::Collaborator(_) => "collaborator_failed",
            Self::Persistence(_) => "persistence_failed",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::GameNotFound(_) => StatusCode::NOT_FOUND,
            Self::GameAlreadyRunning(_) => StatusCode::CONFLICT,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type BoothResult<T> = Result<T, BoothError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for BoothError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<CollaboratorError> for BoothError {
    fn from(err: CollaboratorError) -> Self {
        Self::Collaborator(err.to_string())
    }
}

impl From<PersistError> for BoothError {
    fn from(err: PersistError) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<WatchError> for BoothError {
    fn from(err: WatchError) -> Self {
        Self::Ingest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_not_found_maps_to_404() {
        let err = BoothError::GameNotFound("GAME".into());
        assert_eq!(err.code(), "game_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_request_maps_to_400() {
        let err = BoothError::InvalidRequest("bad subscribe".into());
        assert_eq!(err.code(), "invalid_request");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
