//! Secure credential storage for the TripWithU client
//!
//! This crate provides the device-keychain stand-in the session layer
//! persists its refresh token through: an asynchronous get/set/remove
//! interface over an opaque string blob, with a sled-backed store for
//! real use and an in-memory store for tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::{SledStore, SledStoreConfig};

use async_trait::async_trait;
use thiserror::Error;

/// Secure storage error types
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database error
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Stored blob is not valid UTF-8
    #[error("Corrupt entry under key: {0}")]
    CorruptEntry(String),
}

/// Result type for secure storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Asynchronous secure blob storage.
///
/// Modeled on a device keychain service: values are opaque strings
/// keyed by a service name, and every access may suspend. The session
/// layer stores exactly one blob (its auth record) through this trait,
/// but implementations must not assume that.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Read the blob stored under `name`, if any.
    async fn get(&self, name: &str) -> Result<Option<String>>;

    /// Store `value` under `name`, replacing any previous blob.
    async fn set(&self, name: &str, value: &str) -> Result<()>;

    /// Delete the blob under `name`. Removing a missing key is not an
    /// error.
    async fn remove(&self, name: &str) -> Result<()>;
}
