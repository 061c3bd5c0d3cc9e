//! Errors raised while talking to an upstream image host.

/// Upstream failure conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum UpstreamErrorKind {
    /// Network failure or timeout; worth another attempt
    #[display("Transient upstream failure: {}", _0)]
    Transient(String),
    /// No credential configured for the provider
    #[display("Unauthorized: {}", _0)]
    Unauthorized(String),
    /// Upstream answered with something we cannot interpret; retried like
    /// a network failure
    #[display("Malformed upstream payload: {}", _0)]
    MalformedPayload(String),
    /// Upstream answered with an error status
    #[display("HTTP {} from upstream: {}", status, message)]
    Status {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },
}

impl UpstreamErrorKind {
    /// Check if this error type should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamErrorKind::Transient(_) | UpstreamErrorKind::MalformedPayload(_) => true,
            UpstreamErrorKind::Status { status, .. } => {
                matches!(*status, 408 | 500 | 502 | 503 | 504)
            }
            UpstreamErrorKind::Unauthorized(_) => false,
        }
    }
}

/// Upstream error with source location tracking.
///
/// # Examples
///
/// ```
/// use pacer_error::{RetryableError, UpstreamError, UpstreamErrorKind};
///
/// let err = UpstreamError::new(UpstreamErrorKind::Status {
///     status: 503,
///     message: "Service unavailable".to_string(),
/// });
/// assert!(err.is_retryable());
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Upstream Error: {} at line {} in {}", kind, line, file)]
pub struct UpstreamError {
    /// The kind of error that occurred
    pub kind: UpstreamErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl UpstreamError {
    /// Create a new UpstreamError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: UpstreamErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}

/// Trait for errors that support retry logic.
///
/// Transient errors like network resets or 503s should return true.
/// Permanent errors like a missing credential should return false.
pub trait RetryableError {
    /// Returns true if this error should trigger a retry.
    fn is_retryable(&self) -> bool;
}

impl RetryableError for UpstreamError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}
