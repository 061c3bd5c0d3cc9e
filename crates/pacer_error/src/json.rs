//! Failures encoding chunk payloads or decoding upstream bodies.

/// A payload that could not be turned into (or read from) JSON.
///
/// Raised when a paced chunk cannot be encoded and when an upstream body is
/// read as JSON but is not.
///
/// # Examples
///
/// ```
/// use pacer_error::{JsonError, PacerError, PacerErrorKind};
///
/// let err: PacerError = JsonError::new("Failed to decode upstream body: expected value").into();
/// assert!(matches!(err.kind(), PacerErrorKind::Json(e) if e.message.starts_with("Failed to decode")));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("JSON Error: {} at line {} in {}", message, line, file)]
pub struct JsonError {
    /// What failed to encode or decode, and serde's reason
    pub message: String,
    /// Line of the call that raised it
    pub line: u32,
    /// File of the call that raised it
    pub file: &'static str,
}

impl JsonError {
    /// Wrap a serde failure message, capturing the caller's location.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let location = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: location.line(),
            file: location.file(),
        }
    }
}
