use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::storage::KvStorageInterface;

#[derive(Debug, Default)]
pub struct MemStorage<V>
where V: Clone
{
    table: DashMap<String, V>,
}

impl<V> MemStorage<V>
where V: Clone
{
    pub fn new() -> Self {
        Self {
            table: DashMap::default(),
        }
    }
}

#[async_trait]
impl<V> KvStorageInterface<V> for MemStorage<V>
where V: Clone + Send + Sync
{
    async fn get(&self, key: &str) -> Result<Option<V>> {
        Ok(self.table.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: &V) -> Result<()> {
        self.table.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<(String, V)>> {
        Ok(self
            .table
            .iter()
            .map(|kv| (kv.key().clone(), kv.value().clone()))
            .collect())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.table.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.table.clear();
        Ok(())
    }

    async fn count(&self) -> Result<u32> {
        Ok(self.table.len() as u32)
    }
}
