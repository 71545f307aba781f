// Error handling types for the console API

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::fmt;
use tracing::error;

use super::validation::ValidationResult;
use crate::backend::BackendError;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    BadRequest(String),
    NotFound(String),
    InternalServer(String),
    ServiceUnavailable(String),
    ValidationError(String),
    RemoteWrite(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::InternalServer(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service Unavailable: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::RemoteWrite(msg) => write!(f, "Write Rejected: {}", msg),
        }
    }
}

impl ApiError {
    /// Stable machine-readable code, also used for websocket error frames
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InternalServer(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::RemoteWrite(_) => "REMOTE_WRITE_REJECTED",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) | ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InternalServer(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::RemoteWrite(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Message safe to show to the operator
    pub fn message(&self) -> String {
        match self {
            ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::InternalServer(msg)
            | ApiError::ServiceUnavailable(msg)
            | ApiError::ValidationError(msg)
            | ApiError::RemoteWrite(msg) => msg.clone(),
        }
    }
}

/// JSON error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let error_response = ErrorResponse {
            error: self.message(),
            code: self.code().to_string(),
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Auth(msg) => ApiError::Unauthorized(msg),
            BackendError::RemoteWrite(msg) => ApiError::RemoteWrite(msg),
            BackendError::Network(msg) => ApiError::ServiceUnavailable(msg),
            BackendError::NotFound(msg) => ApiError::NotFound(msg),
            BackendError::Function(msg) => ApiError::BadRequest(msg),
            BackendError::Decode(msg) => {
                error!(error = %msg, "Backend returned an unexpected payload");
                ApiError::InternalServer("Unexpected response from backend".to_string())
            }
        }
    }
}

/// Helper function to convert ValidationResult to ApiError
impl From<ValidationResult> for ApiError {
    fn from(result: ValidationResult) -> Self {
        if result.is_valid {
            ApiError::InternalServer(
                "Validation result was valid but converted to error".to_string(),
            )
        } else {
            ApiError::ValidationError(result.summary())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_errors_map_to_taxonomy() {
        assert!(matches!(
            ApiError::from(BackendError::Auth("Invalid login credentials".into())),
            ApiError::Unauthorized(_)
        ));
        assert!(matches!(
            ApiError::from(BackendError::RemoteWrite("permission denied".into())),
            ApiError::RemoteWrite(_)
        ));
        assert!(matches!(
            ApiError::from(BackendError::Network("timed out".into())),
            ApiError::ServiceUnavailable(_)
        ));
    }

    #[test]
    fn test_decode_errors_are_not_leaked() {
        let err = ApiError::from(BackendError::Decode("missing field `id`".into()));
        assert_eq!(err.message(), "Unexpected response from backend");
        assert_eq!(err.code(), "INTERNAL_SERVER_ERROR");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::RemoteWrite("x".into()).into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::ValidationError("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
