//! Error types for the Pacer upload relay.
//!
//! This crate provides the foundation error types used throughout the Pacer workspace.
//!
//! # Error Hierarchy
//!
//! All errors follow the `ErrorKind` + wrapper struct pattern:
//! - `*ErrorKind` enum defines specific error conditions
//! - `*Error` struct wraps the kind with source location tracking
//! - All constructors use `#[track_caller]` for automatic location capture
//!
//! # Examples
//!
//! ```
//! use pacer_error::{PacerResult, UpstreamError, UpstreamErrorKind};
//!
//! fn forward() -> PacerResult<()> {
//!     Err(UpstreamError::new(UpstreamErrorKind::Transient(
//!         "connection reset".to_string(),
//!     )))?
//! }
//!
//! assert!(forward().is_err());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod chunk;
mod config;
mod error;
mod json;
mod rate_limit;
mod request;
mod server;
mod storage;
mod upstream;

pub use chunk::{ChunkError, ChunkErrorKind};
pub use config::ConfigError;
pub use error::{PacerError, PacerErrorKind, PacerResult};
pub use json::JsonError;
pub use rate_limit::{RateLimitError, RateLimitErrorKind, RateLimitReason};
pub use request::RequestError;
pub use server::{ServerError, ServerErrorKind};
pub use storage::{StorageError, StorageErrorKind};
pub use upstream::{RetryableError, UpstreamError, UpstreamErrorKind};
