//! Module of MemStorage and the replicated KeyStore

pub mod keystore;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
pub use crate::storage::keystore::KeyStore;
pub use crate::storage::keystore::ValueSet;
pub use crate::storage::memory::MemStorage;

/// Key value storage interface
#[async_trait]
pub trait KvStorageInterface<V> {
    /// Get a cache entry by `key`.
    async fn get(&self, key: &str) -> Result<Option<V>>;

    /// Put `entry` in the cache under `key`.
    async fn put(&self, key: &str, value: &V) -> Result<()>;

    async fn get_all(&self) -> Result<Vec<(String, V)>>;

    /// Remove an `entry` by `key`.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Delete all values.
    async fn clear(&self) -> Result<()>;

    /// Get the current storage usage.
    async fn count(&self) -> Result<u32>;
}
