//! Rate limiting error types.

use serde::{Deserialize, Serialize};

/// Why a call was (or would be) throttled.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RateLimitReason {
    /// A per-bucket (or single provider-wide) window is exhausted
    Bucket,
    /// The provider's account/IP-wide window is exhausted
    Global,
    /// Throttled, but the provider did not say which scope
    Unknown,
}

/// Error kinds for rate limiting operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum RateLimitErrorKind {
    /// Local policy kept denying until the retry budget ran out.
    #[display("Rate limit exceeded ({}), resets at {:?}", reason, reset_at)]
    LimitExceeded {
        /// Scope that denied the call
        reason: RateLimitReason,
        /// Window end, epoch seconds
        reset_at: Option<i64>,
    },
    /// Upstream kept answering 429 until the retry budget ran out.
    #[display("Rate limit exceeded after {} retries ({})", retries, reason)]
    RetriesExhausted {
        /// Number of retries performed
        retries: u32,
        /// Scope of the last throttle
        reason: RateLimitReason,
        /// Window end, epoch seconds
        reset_at: Option<i64>,
    },
}

impl RateLimitErrorKind {
    /// Known reset time, epoch seconds.
    pub fn reset_at(&self) -> Option<i64> {
        match self {
            RateLimitErrorKind::LimitExceeded { reset_at, .. } => *reset_at,
            RateLimitErrorKind::RetriesExhausted { reset_at, .. } => *reset_at,
        }
    }

    /// Scope of the throttle that ended the call.
    pub fn reason(&self) -> RateLimitReason {
        match self {
            RateLimitErrorKind::LimitExceeded { reason, .. } => *reason,
            RateLimitErrorKind::RetriesExhausted { reason, .. } => *reason,
        }
    }
}

/// Rate limiting error with location tracking.
///
/// # Examples
///
/// ```
/// use pacer_error::{RateLimitError, RateLimitErrorKind, RateLimitReason};
///
/// let err = RateLimitError::new(RateLimitErrorKind::RetriesExhausted {
///     retries: 3,
///     reason: RateLimitReason::Global,
///     reset_at: None,
/// });
/// assert!(format!("{}", err).contains("after 3 retries"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Rate Limit Error: {} at line {} in {}", kind, line, file)]
pub struct RateLimitError {
    /// The kind of error that occurred
    pub kind: RateLimitErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl RateLimitError {
    /// Create a new rate limiting error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: RateLimitErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
