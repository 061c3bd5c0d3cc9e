//! Error types for the HTTP host.

/// Error kinds for server lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub enum ServerErrorKind {
    /// Failed to bind the listener
    #[display("Failed to bind {}: {}", address, message)]
    Bind {
        /// Address we tried to bind
        address: String,
        /// Underlying error message
        message: String,
    },
    /// The server loop terminated with an error
    #[display("Server terminated: {}", _0)]
    Serve(String),
    /// Failed to build the upstream HTTP client
    #[display("HTTP client setup failed: {}", _0)]
    Client(String),
}

/// Error wrapper with location tracking.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Server Error: {} at line {} in {}", kind, line, file)]
pub struct ServerError {
    /// The error kind
    pub kind: ServerErrorKind,
    /// Line number where error occurred
    pub line: u32,
    /// File where error occurred
    pub file: &'static str,
}

impl ServerError {
    /// Create a new ServerError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: ServerErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
