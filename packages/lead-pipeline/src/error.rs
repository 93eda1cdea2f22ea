//! Typed errors for the lead pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can tell a
//! failed fetch from a failed write without string matching.

use thiserror::Error;

/// Top-level error for library callers.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Fetching from a source failed
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// A raw document could not be parsed
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    /// Persistence failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration is invalid or unreadable
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while fetching raw documents from a source.
///
/// Every variant is retryable from the orchestrator's point of view; the
/// source's unit of work restarts from the beginning on the next attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed (connection, TLS, body read)
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Request exceeded the configured timeout
    #[error("timeout fetching: {url}")]
    Timeout { url: String },

    /// Invalid URL format
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// The run was cancelled while the fetch was in flight
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Map a reqwest error, keeping timeouts distinguishable.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Http(Box::new(err))
        }
    }
}

/// A single document could not be turned into candidates.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON payload did not match the expected shape
    #[error("malformed JSON in {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// A CSS selector in the source profile is invalid
    #[error("invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },

    /// Document is structurally unusable
    #[error("malformed document {url}: {reason}")]
    Malformed { url: String, reason: String },
}

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend (database, lock) failed
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Stored lead could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No lead with this id
    #[error("lead not found: {id}")]
    NotFound { id: String },

    /// A lead violates a data-model invariant
    #[error("invalid lead: {reason}")]
    Invalid { reason: String },
}

impl StoreError {
    /// Wrap any backend error.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

/// Configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is outside its allowed range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for `PipelineConfig`
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for parse operations.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for config operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
