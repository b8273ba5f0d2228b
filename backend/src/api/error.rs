use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::observability::{MetricsError, TraceError};
use crate::registry::RegistryError;
use crate::storage::StorageError;

/// Error codes for machine-readable error responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    ConfigurationError,
    StorageError,
    TraceBackendError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::TraceBackendError => "TRACE_BACKEND_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::ConfigurationError
            | ErrorCode::StorageError
            | ErrorCode::TraceBackendError
            | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Handler error rendered as `{ "error": "...", "code": "..." }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Configuration(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Validation(_) => ErrorCode::ValidationError,
            ApiError::NotFound(_) | ApiError::Storage(StorageError::NotFound { .. }) => {
                ErrorCode::NotFound
            }
            ApiError::Configuration(_) => ErrorCode::ConfigurationError,
            ApiError::Storage(_) => ErrorCode::StorageError,
            ApiError::Trace(_) => ErrorCode::TraceBackendError,
            ApiError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            RegistryError::AlreadyRegistered(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<MetricsError> for ApiError {
    fn from(err: MetricsError) -> Self {
        match err {
            MetricsError::NoTraces(_) => ApiError::NotFound(err.to_string()),
            MetricsError::Trace(trace) => ApiError::Trace(trace),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        if code.status_code().is_server_error() {
            tracing::error!(code = code.as_str(), error = %self, "Request failed");
        }
        (
            code.status_code(),
            Json(json!({
                "error": self.to_string(),
                "code": code.as_str(),
            })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::validation("runId is required").code().status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(StorageError::not_found("report", "r1")).code(),
            ErrorCode::NotFound
        );
        assert_eq!(
            ApiError::from(RegistryError::NotFound("run-1".to_string()))
                .code()
                .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Configuration("observability not configured".to_string())
                .code()
                .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
