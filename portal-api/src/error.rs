//! Error Types for Portal API
//!
//! This module defines error handling for the API layer:
//! - `ErrorCode`, the closed set of failures a client can observe
//! - `ApiError`, the JSON error body
//! - `IntoResponse` so handlers can return `ApiResult<T>` directly
//! - conversions from the store, config and PostgreSQL error types
//!
//! Internal details are logged at the conversion site and never leaked to
//! clients for server-side failures.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use portal_core::{ConfigError, QueryError, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

use crate::constants::DEFAULT_RETRY_AFTER_SECS;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Sort, order or paging parameters were rejected.
    InvalidQuery,

    /// The store is temporarily unreachable; the client should retry.
    TransientUnavailable,

    /// Anything the client cannot fix by retrying.
    UnexpectedError,

    /// Startup configuration was rejected.
    InvalidConfiguration,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidQuery => StatusCode::BAD_REQUEST,
            ErrorCode::TransientUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::UnexpectedError | ErrorCode::InvalidConfiguration => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidQuery => "Invalid query parameters",
            ErrorCode::TransientUnavailable => "Service temporarily unavailable, retry shortly",
            ErrorCode::UnexpectedError => "Unexpected server error",
            ErrorCode::InvalidConfiguration => "Invalid configuration",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Seconds the client should wait before retrying; sent as `Retry-After`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            retry_after_secs: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors
    // ========================================================================

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidQuery, message)
    }

    /// A 503 carrying the default `Retry-After`.
    pub fn transient_unavailable() -> Self {
        Self {
            retry_after_secs: Some(DEFAULT_RETRY_AFTER_SECS),
            ..Self::from_code(ErrorCode::TransientUnavailable)
        }
    }

    pub fn unexpected() -> Self {
        Self::from_code(ErrorCode::UnexpectedError)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnexpectedError, message)
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self
            .retry_after_secs
            .and_then(|secs| HeaderValue::from_str(&secs.to_string()).ok());
        let mut response = (status, Json(self)).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

/// The read path's translation boundary.
impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidQuery { reason } => ApiError::invalid_query(reason),
            StoreError::Transient { operation, reason } => {
                tracing::warn!(operation = %operation, reason = %reason, "store temporarily unavailable");
                ApiError::transient_unavailable()
            }
            StoreError::Fatal { operation, reason } => {
                tracing::error!(operation = %operation, reason = %reason, "store failure");
                ApiError::unexpected()
            }
        }
    }
}

/// Names the offending parameter in `details` so clients can point at it.
impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let details = match &err {
            QueryError::UnsupportedSort { value } => json!({"parameter": "sort", "value": value}),
            QueryError::UnsupportedOrder { value } => json!({"parameter": "order", "value": value}),
            QueryError::InvalidPage { page } => json!({"parameter": "page", "value": page}),
            QueryError::InvalidPageSize { page_size, max } => {
                json!({"parameter": "page_size", "value": page_size, "max": max})
            }
        };
        ApiError::invalid_query(err.to_string()).with_details(details)
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::invalid_configuration(err.to_string())
    }
}

impl From<tokio_postgres::Error> for ApiError {
    fn from(err: tokio_postgres::Error) -> Self {
        crate::db::classify_pg_error("database", &err).into()
    }
}

impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        crate::db::classify_pool_error(&err).into()
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::InvalidQuery.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorCode::TransientUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorCode::UnexpectedError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_query_error_names_the_parameter() {
        let err: ApiError = QueryError::InvalidPageSize {
            page_size: 500,
            max: 100,
        }
        .into();
        assert_eq!(err.code, ErrorCode::InvalidQuery);
        assert_eq!(
            err.details,
            Some(json!({"parameter": "page_size", "value": 500, "max": 100}))
        );

        let err: ApiError = QueryError::UnsupportedSort {
            value: "species".to_string(),
        }
        .into();
        assert_eq!(err.details, Some(json!({"parameter": "sort", "value": "species"})));
    }

    #[test]
    fn test_store_error_translation() {
        let err: ApiError = StoreError::invalid_query("bad sort").into();
        assert_eq!(err.code, ErrorCode::InvalidQuery);
        assert_eq!(err.message, "bad sort");

        let err: ApiError = StoreError::transient("query", "pool timeout").into();
        assert_eq!(err.code, ErrorCode::TransientUnavailable);
        assert_eq!(err.retry_after_secs, Some(DEFAULT_RETRY_AFTER_SECS));

        let err: ApiError = StoreError::fatal("query", "relation does not exist").into();
        assert_eq!(err.code, ErrorCode::UnexpectedError);
        assert!(!err.message.contains("relation"));
    }

    #[test]
    fn test_transient_response_carries_retry_after() {
        let response = ApiError::transient_unavailable().into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER),
            Some(&HeaderValue::from_static("5"))
        );

        let response = ApiError::invalid_query("page").into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::invalid_query("Unsupported sort field 'species'");
        let json = serde_json::to_string(&err)?;

        assert!(json.contains("INVALID_QUERY"));
        assert!(!json.contains("retry_after_secs"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }
}
