//! In-memory storage backend

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::backend::{validate_partition, CacheEntry, EntryStamp, StorageBackend};
use crate::error::StorageError;

/// Volatile storage backend keeping every partition in a hash map.
///
/// Used for tests and for deployments that do not need the cache to
/// survive a restart.
#[derive(Default)]
pub struct MemoryStorage {
    partitions: RwLock<HashMap<String, HashMap<String, CacheEntry>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn open(&self, partition: &str) -> Result<(), StorageError> {
        validate_partition(partition)?;
        self.partitions
            .write()
            .entry(partition.to_string())
            .or_default();
        Ok(())
    }

    async fn read(&self, partition: &str, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        Ok(self
            .partitions
            .read()
            .get(partition)
            .and_then(|p| p.get(key))
            .cloned())
    }

    async fn write(&self, partition: &str, entry: &CacheEntry) -> Result<(), StorageError> {
        validate_partition(partition)?;
        let mut stored = entry.clone();
        stored.partition = partition.to_string();
        self.partitions
            .write()
            .entry(partition.to_string())
            .or_default()
            .insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self
            .partitions
            .write()
            .get_mut(partition)
            .map(|p| p.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn list_keys(&self, partition: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .partitions
            .read()
            .get(partition)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_stamps(&self, partition: &str) -> Result<Vec<EntryStamp>, StorageError> {
        Ok(self
            .partitions
            .read()
            .get(partition)
            .map(|p| {
                p.values()
                    .map(|e| EntryStamp {
                        key: e.key.clone(),
                        cached_at: e.cached_at,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(&self, partition: &str) -> Result<usize, StorageError> {
        Ok(self
            .partitions
            .read()
            .get(partition)
            .map(|p| p.len())
            .unwrap_or(0))
    }
}
