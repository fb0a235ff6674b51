//! In-memory secure store
//!
//! Nothing is persisted; contents vanish with the process. Intended for
//! tests and as a fallback when no durable backend is available.

use crate::{Result, SecureStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Volatile secure store backed by a map.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(name).cloned())
    }

    async fn set(&self, name: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.entries.write().await.remove(name);
        Ok(())
    }
}
