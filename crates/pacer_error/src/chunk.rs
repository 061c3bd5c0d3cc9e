//! Chunked upload error types.

/// Chunked upload failure conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum ChunkErrorKind {
    /// A chunk failed; later chunks were not submitted.
    #[display("Chunk {} of {} failed: {}", index, total, message)]
    Failed {
        /// 1-based index of the failing chunk
        index: usize,
        /// Number of chunks planned
        total: usize,
        /// Upstream status, when the failure was an HTTP answer
        status: Option<u16>,
        /// Remote resource created by the first chunk, if any
        resource_id: Option<String>,
        /// Error message
        message: String,
    },
    /// Chunk size of zero
    #[display("Chunk size must be at least 1")]
    InvalidChunkSize,
}

/// Chunked upload error with location tracking.
///
/// # Examples
///
/// ```
/// use pacer_error::{ChunkError, ChunkErrorKind};
///
/// let err = ChunkError::new(ChunkErrorKind::Failed {
///     index: 2,
///     total: 3,
///     status: Some(500),
///     resource_id: Some("abc".to_string()),
///     message: "Internal error".to_string(),
/// });
/// assert!(format!("{}", err).contains("Chunk 2 of 3"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Chunk Error: {} at line {} in {}", kind, line, file)]
pub struct ChunkError {
    /// The kind of error that occurred
    pub kind: ChunkErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl ChunkError {
    /// Create a new chunk error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: ChunkErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
