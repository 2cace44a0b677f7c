//! Server error types with HTTP status code mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fathom_core::Error as CoreError;
use serde::Serialize;
use thiserror::Error;

/// Server error type that wraps core errors and provides HTTP status
/// mapping
#[derive(Error, Debug)]
pub enum ServerError {
    /// Schema / pool / backend error
    #[error("{0}")]
    Core(#[from] CoreError),

    /// JSON parsing error
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack parsing error
    #[error("Invalid MsgPack: {0}")]
    MsgPack(#[from] rmp_serde::decode::Error),

    /// Generic bad request error
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unsupported Content-Type
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Not Found (404)
    #[error("{0}")]
    NotFound(String),

    /// Background task failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Create a bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ServerError::BadRequest(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        ServerError::NotFound(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        ServerError::Internal(msg.into())
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 - schema inconsistency and malformed input
            ServerError::Core(CoreError::Client(_))
            | ServerError::Core(CoreError::MissingType { .. })
            | ServerError::Core(CoreError::Serialisation { .. })
            | ServerError::Json(_)
            | ServerError::MsgPack(_)
            | ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,

            // 404 - missing document or index
            ServerError::Core(CoreError::NotFound(_)) | ServerError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }

            // 409 - id conflict on a non-replace write
            ServerError::Core(CoreError::DocVersionConflict(_)) => StatusCode::CONFLICT,

            // 415 - unknown body encoding
            ServerError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,

            // 503 - no active shard accepts writes (retryable)
            ServerError::Core(CoreError::Conflict(_)) => StatusCode::SERVICE_UNAVAILABLE,

            // 504 - checkout or backend deadline expired
            ServerError::Core(CoreError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,

            // 500 - corruption and internal failures
            ServerError::Core(CoreError::Corruption(_))
            | ServerError::Core(CoreError::Backend(_))
            | ServerError::Core(CoreError::Io(_))
            | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// HTTP status code
    pub status: u16,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_string(),
            status: status.as_u16(),
        };
        let json = serde_json::to_string(&body)
            .unwrap_or_else(|_| format!(r#"{{"error":"{}","status":{}}}"#, self, status.as_u16()));
        (status, [("content-type", "application/json")], json).into_response()
    }
}

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServerError::Core(CoreError::client("x")).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::Core(CoreError::missing_type("f")).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::Core(CoreError::not_found("d")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::Core(CoreError::conflict("s")).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServerError::Core(CoreError::timeout("t")).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ServerError::Core(CoreError::corruption("c")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
