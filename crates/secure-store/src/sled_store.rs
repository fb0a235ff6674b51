//! Sled-backed secure store
//!
//! Persists blobs in an embedded sled database. On mobile targets the
//! database directory is expected to live inside the app sandbox, which
//! is what makes this an acceptable keychain stand-in.

use crate::{Result, SecureStore, StoreError};
use async_trait::async_trait;
use sled::Db;
use std::sync::Arc;

/// Sled store configuration
#[derive(Debug, Clone)]
pub struct SledStoreConfig {
    /// Database path
    pub path: String,
    /// Cache capacity in bytes
    pub cache_capacity: u64,
    /// Enable compression
    pub use_compression: bool,
    /// Flush interval in milliseconds (None for immediate flush)
    pub flush_every_ms: Option<u64>,
}

impl Default for SledStoreConfig {
    fn default() -> Self {
        Self {
            path: "tripwithu_secure.db".to_string(),
            cache_capacity: 4 * 1024 * 1024,
            use_compression: true,
            flush_every_ms: Some(500),
        }
    }
}

impl SledStoreConfig {
    /// Create a new configuration with a custom path
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), ..Default::default() }
    }

    /// Set cache capacity in bytes
    pub fn cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Enable or disable compression
    pub fn use_compression(mut self, enabled: bool) -> Self {
        self.use_compression = enabled;
        self
    }

    /// Set flush interval in milliseconds
    pub fn flush_every_ms(mut self, ms: Option<u64>) -> Self {
        self.flush_every_ms = ms;
        self
    }
}

/// Durable secure store over an embedded sled database.
pub struct SledStore {
    db: Arc<Db>,
}

impl SledStore {
    /// Open (or create) a store with the given configuration.
    pub fn new(config: SledStoreConfig) -> Result<Self> {
        let mut db_config = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_capacity)
            .use_compression(config.use_compression);

        if let Some(ms) = config.flush_every_ms {
            db_config = db_config.flush_every_ms(Some(ms));
        }

        let db = db_config.open()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Open a temporary store (for testing).
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl SecureStore for SledStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        match self.db.get(name.as_bytes())? {
            Some(bytes) => {
                let value = String::from_utf8(bytes.to_vec())
                    .map_err(|_| StoreError::CorruptEntry(name.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, name: &str, value: &str) -> Result<()> {
        self.db.insert(name.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.db.remove(name.as_bytes())?;
        Ok(())
    }
}
