//! In-memory key-value store.

use crate::KeyValueStore;
use pacer_error::PacerResult;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Process-local store. Contents are lost when the process exits.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> PacerResult<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    #[tracing::instrument(skip(self, value), fields(size = value.len()))]
    async fn put(&self, key: &str, value: &[u8]) -> PacerResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        tracing::trace!("Stored value in memory");
        Ok(())
    }

    async fn delete(&self, key: &str) -> PacerResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
