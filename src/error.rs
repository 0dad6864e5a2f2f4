//! Error types for the data-access layer
//!
//! Provides the classified error taxonomy using thiserror. Every failure a
//! caller can observe is one of these variants; retry decisions branch on
//! the classification rather than on error payloads.

use thiserror::Error;

// == Data Error Enum ==
/// Unified error type for the data-access subsystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// Connection could not be established or dropped mid-flight (retryable)
    #[error("network failure: {0}")]
    Network(String),

    /// A single attempt exceeded its time bound (retryable)
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// HTTP 4xx from the remote (terminal, never retried)
    #[error("client error {status}: {message}")]
    HttpClient { status: u16, message: String },

    /// HTTP 5xx from the remote (retryable)
    #[error("server error {status}: {message}")]
    HttpServer { status: u16, message: String },

    /// Caller cancelled the request (terminal, not surfaced as a failure toast)
    #[error("request aborted: {0}")]
    Aborted(String),

    /// Rate limiter rejected the request before any network attempt (terminal)
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Malformed response body or persisted record (terminal for the operation)
    #[error("parse failure: {0}")]
    Parse(String),
}

impl DataError {
    // == Classification ==
    /// Returns true when the failure class is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DataError::Network(_) | DataError::Timeout(_) | DataError::HttpServer { .. }
        )
    }

    /// Returns true when retrying cannot help.
    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }

    /// Returns true for failures caused by the network layer itself, used to
    /// drive the executor's connectivity signal.
    pub fn is_network_class(&self) -> bool {
        matches!(self, DataError::Network(_) | DataError::Timeout(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the data-access layer.
pub type Result<T> = std::result::Result<T, DataError>;
