//! Top-level error wrapper types.

use crate::{
    ChunkError, ConfigError, JsonError, RateLimitError, RequestError, RetryableError,
    ServerError, StorageError, UpstreamError,
};

/// Every error the Pacer crates can produce.
///
/// # Examples
///
/// ```
/// use pacer_error::{ConfigError, PacerError};
///
/// let err: PacerError = ConfigError::new("bad bind address").into();
/// assert!(format!("{}", err).contains("Configuration Error"));
/// ```
#[derive(Debug, derive_more::From, derive_more::Display, derive_more::Error)]
pub enum PacerErrorKind {
    /// Configuration error
    #[from(ConfigError)]
    Config(ConfigError),
    /// JSON serialization/deserialization error
    #[from(JsonError)]
    Json(JsonError),
    /// Persistence backend error
    #[from(StorageError)]
    Storage(StorageError),
    /// Throttling that could not be absorbed
    #[from(RateLimitError)]
    RateLimit(RateLimitError),
    /// Upstream provider error
    #[from(UpstreamError)]
    Upstream(UpstreamError),
    /// Chunked upload failure
    #[from(ChunkError)]
    Chunk(ChunkError),
    /// Malformed client request
    #[from(RequestError)]
    Request(RequestError),
    /// HTTP host error
    #[from(ServerError)]
    Server(ServerError),
}

/// Pacer error with kind discrimination.
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("Pacer Error: {}", _0)]
pub struct PacerError(Box<PacerErrorKind>);

impl PacerError {
    /// Create a new error from a kind.
    pub fn new(kind: PacerErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &PacerErrorKind {
        &self.0
    }
}

impl RetryableError for PacerError {
    fn is_retryable(&self) -> bool {
        match self.kind() {
            PacerErrorKind::Upstream(e) => e.is_retryable(),
            _ => false,
        }
    }
}

// Generic From implementation for any type that converts to PacerErrorKind
impl<T> From<T> for PacerError
where
    T: Into<PacerErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for Pacer operations.
pub type PacerResult<T> = std::result::Result<T, PacerError>;
