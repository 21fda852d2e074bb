//! JSON error responses with stable error codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::runtime::RuntimeError;

/// Stable machine-readable error codes in API error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    InvalidRequest,
    MissingQuery,
    RuntimeError,
    ContextNotFound,
    FileNotFound,
    InvalidFile,
    InvalidFileMetadata,
    InvalidFileContent,
    Unknown,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: ErrorCode,
    message: String,
}

/// An error response: HTTP status plus `{code, message}` JSON body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest, message)
    }

    pub fn missing_query(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::MissingQuery, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::RuntimeError,
            message,
        )
    }

    pub fn file_not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorCode::FileNotFound, message)
    }

    /// Map a filesystem error: missing paths are 404, the rest are 500.
    pub fn from_file_error(err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::file_not_found(format!("file not found. {err}"))
        } else {
            Self::runtime(format!("error accessing file: {err}"))
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::ContextNotFound => Self::new(
                StatusCode::NOT_FOUND,
                ErrorCode::ContextNotFound,
                err.to_string(),
            ),
            other => Self::runtime(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_as_pascal_case_names() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::InvalidRequest).unwrap(),
            "\"InvalidRequest\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::ContextNotFound).unwrap(),
            "\"ContextNotFound\""
        );
    }

    #[test]
    fn context_not_found_maps_to_404() {
        let err = ApiError::from(RuntimeError::ContextNotFound);
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, ErrorCode::ContextNotFound);

        let err = ApiError::from(RuntimeError::SessionBusy);
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, ErrorCode::RuntimeError);
    }
}
