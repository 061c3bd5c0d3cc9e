//! Key-value persistence for Pacer.
//!
//! The rate-limit engine keeps its state alive between process restarts by
//! writing an opaque blob under a well-known key. This crate provides the
//! `KeyValueStore` abstraction plus two backends:
//!
//! - **`FileSystemStore`**: one file per key, written atomically (temp file + rename)
//! - **`MemoryStore`**: process-local map, used by tests and ephemeral deployments
//!
//! # Example
//!
//! ```rust
//! use pacer_storage::{KeyValueStore, MemoryStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//! store.put("rate_limits", b"{}").await?;
//! assert_eq!(store.get("rate_limits").await?, Some(b"{}".to_vec()));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use pacer_error::PacerResult;

mod filesystem;
mod memory;

pub use filesystem::FileSystemStore;
pub use memory::MemoryStore;
pub use pacer_error::{StorageError, StorageErrorKind};

/// Trait for pluggable key-value persistence backends.
///
/// Values are opaque bytes; callers own the serialization format.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Read the value stored under `key`.
    ///
    /// Returns `Ok(None)` when the key was never written.
    async fn get(&self, key: &str) -> PacerResult<Option<Vec<u8>>>;

    /// Durably write `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &[u8]) -> PacerResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> PacerResult<()>;
}
