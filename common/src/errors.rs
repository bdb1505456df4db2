//! Application error types.
//!
//! Every request-time failure is an [`AppError`]; its [`IntoResponse`] impl
//! decides the HTTP status and renders the `{"detail": ...}` body.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::response::ErrorDetail;

pub const AUTH_MISSING_HEADER_MSG: &str = "Missing Authorization header";
pub const AUTH_INVALID_SCHEME_MSG: &str = "Invalid auth scheme, use 'Bearer <token>'";
pub const AUTH_INVALID_KEY_MSG: &str = "Invalid API key";
pub const RATE_LIMIT_MESSAGE: &str =
    "Rate limit exceeded. Please try again later or contact your administrator.";
pub const INVALID_FORMAT_MSG: &str = "Invalid format. Use 'json' or 'csv'.";

/// Main error type for the gateway.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or malformed startup configuration. Fatal.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A single backend's pool could not be built. Logged, never served.
    #[error("Failed to create pool for {backend}: {message}")]
    PoolCreation { backend: String, message: String },

    /// The requested backend has no pool (unknown name or failed creation).
    #[error("No pool configured for cloud '{0}'")]
    NoPoolConfigured(String),

    #[error("{}", AUTH_MISSING_HEADER_MSG)]
    MissingAuthHeader,

    #[error("{}", AUTH_INVALID_SCHEME_MSG)]
    InvalidAuthScheme,

    #[error("{}", AUTH_INVALID_KEY_MSG)]
    InvalidApiKey,

    #[error("{}", RATE_LIMIT_MESSAGE)]
    RateLimited,

    #[error("{}", INVALID_FORMAT_MSG)]
    InvalidFormat,

    /// Request parameters missing or empty.
    #[error("{0}")]
    Validation(String),

    /// Acquiring a pooled connection failed (pool closed, acquire timeout).
    #[error("{0}")]
    DatabaseConnection(String),

    /// The driver rejected or failed the statement. The message is echoed
    /// to the caller verbatim.
    #[error("{0}")]
    Execution(String),

    /// Writing or opening the CSV artifact failed.
    #[error("Failed to encode result: {0}")]
    Encoding(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingAuthHeader | Self::InvalidAuthScheme => StatusCode::UNAUTHORIZED,
            Self::InvalidApiKey => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidFormat => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Config(_)
            | Self::PoolCreation { .. }
            | Self::NoPoolConfigured(_)
            | Self::DatabaseConnection(_)
            | Self::Execution(_)
            | Self::Encoding(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Creates an execution error with the given message.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let challenge = matches!(self, Self::MissingAuthHeader | Self::InvalidAuthScheme);
        let body = Json(ErrorDetail {
            detail: self.to_string(),
        });

        let mut response = (status, body).into_response();
        if challenge {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::MissingAuthHeader.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::InvalidAuthScheme.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::InvalidApiKey.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AppError::InvalidFormat.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::NoPoolConfigured("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::execution("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_execution_message_is_verbatim() {
        let err = AppError::execution("relation \"nope\" does not exist");
        assert_eq!(err.to_string(), "relation \"nope\" does not exist");
    }

    #[test]
    fn test_no_pool_message() {
        let err = AppError::NoPoolConfigured("foo".into());
        assert_eq!(err.to_string(), "No pool configured for cloud 'foo'");
    }

    #[test]
    fn test_auth_errors_carry_challenge_header() {
        let response = AppError::MissingAuthHeader.into_response();
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );

        let response = AppError::InvalidApiKey.into_response();
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AppError>();
    }
}
