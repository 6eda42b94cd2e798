//! Multi-valued store of the keys a member owns.

use std::str::FromStr;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::dht::RingId;
use crate::error::Result;
use crate::storage::KvStorageInterface;
use crate::storage::MemStorage;

/// The values stored under one key.
pub type ValueSet = Vec<Value>;

/// Maps the ring id of a key to the set of values inserted under it.
/// Values are opaque JSON and compared by equality.
pub struct KeyStore {
    storage: Box<dyn KvStorageInterface<ValueSet> + Send + Sync>,
    write_lock: Mutex<()>,
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new(Box::new(MemStorage::new()))
    }
}

impl KeyStore {
    /// Wrap a storage backend.
    pub fn new(storage: Box<dyn KvStorageInterface<ValueSet> + Send + Sync>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Add `value` to the set of `key`. Inserting a present value changes nothing.
    pub async fn insert(&self, key: RingId, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let k = key.to_canonical_string();
        let mut values = self.storage.get(&k).await?.unwrap_or_default();
        if !values.contains(&value) {
            values.push(value);
            self.storage.put(&k, &values).await?;
        }
        Ok(())
    }

    /// All values of `key`, empty when absent.
    pub async fn retrieve(&self, key: RingId) -> Result<ValueSet> {
        Ok(self
            .storage
            .get(&key.to_canonical_string())
            .await?
            .unwrap_or_default())
    }

    /// Delete one matching value of `key`. Absent values are a no-op.
    pub async fn remove(&self, key: RingId, value: &Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let k = key.to_canonical_string();
        let Some(mut values) = self.storage.get(&k).await? else {
            return Ok(());
        };
        let Some(pos) = values.iter().position(|v| v == value) else {
            return Ok(());
        };
        values.remove(pos);
        if values.is_empty() {
            self.storage.remove(&k).await
        } else {
            self.storage.put(&k, &values).await
        }
    }

    /// Every stored entry.
    pub async fn entries(&self) -> Result<Vec<(RingId, ValueSet)>> {
        let mut ret = vec![];
        for (k, values) in self.storage.get_all().await? {
            match RingId::from_str(&k) {
                Ok(id) => ret.push((id, values)),
                Err(e) => tracing::warn!("skip malformed key {k} in store: {e}"),
            }
        }
        Ok(ret)
    }

    /// Remove and return the entries whose key matches `pred`.
    pub async fn take_where<F>(&self, pred: F) -> Result<Vec<(RingId, ValueSet)>>
    where F: Fn(&RingId) -> bool + Send {
        let _guard = self.write_lock.lock().await;
        let mut taken = vec![];
        for (id, values) in self.entries().await? {
            if pred(&id) {
                self.storage.remove(&id.to_canonical_string()).await?;
                taken.push((id, values));
            }
        }
        Ok(taken)
    }

    /// Merge entries handed over by another member.
    pub async fn insert_entries(&self, entries: Vec<(RingId, ValueSet)>) -> Result<()> {
        for (id, values) in entries {
            for v in values {
                self.insert(id, v).await?;
            }
        }
        Ok(())
    }

    /// Number of keys.
    pub async fn count(&self) -> Result<u32> {
        self.storage.count().await
    }
}
