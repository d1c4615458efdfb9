// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Convert steplog_core errors to HTTP errors
impl From<steplog_core::Error> for AppError {
    fn from(err: steplog_core::Error) -> Self {
        use steplog_core::Error;

        match err {
            Error::StreamNotFound(_) => Self::not_found(err.to_string()),
            Error::StreamClosed(_) => Self::conflict(err.to_string()),
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::SinkUnavailable(msg) => {
                tracing::error!("Log sink error: {}", msg);
                Self::service_unavailable("Log storage temporarily unavailable")
            }
            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                Self::internal_server_error("Internal server error")
            }
        }
    }
}

impl From<crate::impls::IngestError> for AppError {
    fn from(err: crate::impls::IngestError) -> Self {
        Self::bad_request(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steplog_core::{Error, SourceId};

    #[test]
    fn test_core_error_status_mapping() {
        let cases = [
            (Error::StreamNotFound(SourceId::from("a")), StatusCode::NOT_FOUND),
            (Error::StreamClosed(SourceId::from("a")), StatusCode::CONFLICT),
            (Error::InvalidInput("bad".into()), StatusCode::BAD_REQUEST),
            (Error::SinkUnavailable("down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = AppError::from(Error::Internal("password=hunter2".into()));
        assert_eq!(err.message, "Internal server error");
    }
}
