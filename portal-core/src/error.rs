//! Error types for Portal operations

use std::time::Duration;
use thiserror::Error;

/// Store adapter errors.
///
/// The split between `Transient` and `Fatal` drives both retry decisions in
/// the refresh job and the HTTP status chosen by the read path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Transient store failure during {operation}: {reason}")]
    Transient { operation: String, reason: String },

    #[error("Store failure during {operation}: {reason}")]
    Fatal { operation: String, reason: String },
}

impl StoreError {
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }

    pub fn transient(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn fatal(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fatal {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidQuery { .. } => "invalid_query",
            Self::Transient { .. } => "transient",
            Self::Fatal { .. } => "fatal",
        }
    }
}

/// Result alias for store adapter operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Query validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Unsupported sort field '{value}', expected one of: id, name")]
    UnsupportedSort { value: String },

    #[error("Unsupported sort order '{value}', expected one of: asc, desc")]
    UnsupportedOrder { value: String },

    #[error("Page must be >= 1, got {page}")]
    InvalidPage { page: u32 },

    #[error("Page size must be between 1 and {max}, got {page_size}")]
    InvalidPageSize { page_size: u32, max: u32 },
}

impl From<QueryError> for StoreError {
    fn from(err: QueryError) -> Self {
        StoreError::invalid_query(err.to_string())
    }
}

/// Upstream API errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// Retryable failure: timeout, connection error, 429 or 5xx.
    #[error("Transient upstream failure on page {page}: {reason}")]
    Transient {
        page: u32,
        reason: String,
        retry_after: Option<Duration>,
    },

    /// Non-retryable failure: other 4xx or an undecodable payload.
    #[error("Upstream rejected page {page} (status {status:?}): {reason}")]
    Fatal {
        page: u32,
        status: Option<u16>,
        reason: String,
    },

    /// Retry budget exhausted for a single page.
    #[error("Upstream unavailable on page {page} after {attempts} attempts: {last_error}")]
    Unavailable {
        page: u32,
        attempts: u32,
        last_error: String,
    },
}

impl UpstreamError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn page(&self) -> u32 {
        match self {
            Self::Transient { page, .. } | Self::Fatal { page, .. } | Self::Unavailable { page, .. } => {
                *page
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Fatal { .. } => "fatal",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

/// Cache-internal errors. Never surfaced past a cache boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache lock poisoned: {cache}")]
    LockPoisoned { cache: &'static str },

    #[error("Cache index corrupted: {reason}")]
    Corrupted { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}
