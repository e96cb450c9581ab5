//! Content store over a storage backend

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use fieldcache_proxy::ResourceResponse;
use fieldcache_storage::{CacheEntry, StorageBackend};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::eviction;
use crate::clock::Clock;
use crate::error::CoreError;
use crate::partition::{Partition, PartitionConfig, PartitionRegistry};

/// Lock stripes shared by writes and expiry deletes
const KEY_LOCK_STRIPES: usize = 64;

/// Counters kept since the store was created
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub evictions: u64,
    pub expired: u64,
}

/// Partitioned content store
///
/// Storage failures are logged and treated as misses or skipped writes;
/// they are never returned from `get` or `put`.
pub struct ContentStore {
    storage: Arc<dyn StorageBackend>,
    registry: PartitionRegistry,
    clock: Arc<dyn Clock>,
    /// One eviction pass at a time per partition
    eviction_locks: [Mutex<()>; 6],
    /// A write and an expiry delete of the same key never interleave
    key_locks: Vec<Mutex<()>>,
    stats: RwLock<CacheStats>,
}

impl ContentStore {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        registry: PartitionRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        for config in registry.iter() {
            debug!(
                "Partition {} ({}, max_entries: {}, max_age: {}s)",
                config.name(),
                config.strategy.as_str(),
                config.max_entries,
                config.max_age.num_seconds()
            );
        }

        Self {
            storage,
            registry,
            clock,
            eviction_locks: Partition::ALL.map(|_| Mutex::new(())),
            key_locks: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn registry(&self) -> &PartitionRegistry {
        &self.registry
    }

    pub fn config(&self, partition: Partition) -> &PartitionConfig {
        self.registry.get(partition)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    /// Prepare a partition for use
    pub async fn open(&self, partition: Partition) -> Result<(), CoreError> {
        self.storage.open(partition.as_str()).await?;
        Ok(())
    }

    /// Prepare every partition
    pub async fn open_all(&self) -> Result<(), CoreError> {
        for partition in Partition::ALL {
            self.open(partition).await?;
        }
        info!("Opened {} cache partitions", Partition::ALL.len());
        Ok(())
    }

    /// Build an entry for `response` stamped with the current time
    pub fn entry_for(&self, key: &str, partition: Partition, response: &ResourceResponse) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            partition: partition.as_str().to_string(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at: Some(self.clock.now()),
        }
    }

    /// Read an entry. Entries older than the partition's max age are
    /// deleted and reported as a miss.
    pub async fn get(&self, partition: Partition, key: &str) -> Option<CacheEntry> {
        let entry = match self.storage.read(partition.as_str(), key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cache read failed for {} in {}: {}", key, partition, e);
                None
            }
        };

        let Some(entry) = entry else {
            self.record_miss(partition);
            return None;
        };

        if self.is_expired(partition, &entry) {
            debug!("Expired entry {} in {}", key, partition);
            if self.delete_if_expired(partition, key).await {
                self.stats.write().expired += 1;
            }
            self.record_miss(partition);
            return None;
        }

        self.record_hit(partition);
        Some(entry)
    }

    /// Write an entry, replacing any existing one, then enforce the
    /// partition's entry budget
    pub async fn put(&self, partition: Partition, mut entry: CacheEntry) {
        entry.partition = partition.as_str().to_string();

        let written = {
            let _guard = self.key_lock(partition, &entry.key).lock().await;
            self.storage.write(partition.as_str(), &entry).await
        };
        if let Err(e) = written {
            warn!("Cache write failed for {} in {}: {}", entry.key, partition, e);
            return;
        }
        self.stats.write().writes += 1;
        debug!("Cached {} in {}", entry.key, partition);

        let evicted = {
            let _guard = self.eviction_locks[partition.index()].lock().await;
            eviction::enforce(self.storage.as_ref(), self.registry.get(partition)).await
        };

        if evicted > 0 {
            self.stats.write().evictions += evicted as u64;
            metrics::counter!("fieldcache_evictions_total", "partition" => partition.as_str())
                .increment(evicted as u64);
        }
    }

    /// Delete an entry, returns whether it existed
    pub async fn delete(&self, partition: Partition, key: &str) -> bool {
        match self.storage.delete(partition.as_str(), key).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!("Cache delete failed for {} in {}: {}", key, partition, e);
                false
            }
        }
    }

    pub async fn list_keys(&self, partition: Partition) -> Vec<String> {
        match self.storage.list_keys(partition.as_str()).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to list keys in {}: {}", partition, e);
                Vec::new()
            }
        }
    }

    /// Remove matching entries. No partition means every partition; no key
    /// means every key. Returns the number of entries removed.
    pub async fn invalidate(&self, partition: Option<Partition>, key: Option<&str>) -> u64 {
        let partitions = match partition {
            Some(p) => vec![p],
            None => Partition::ALL.to_vec(),
        };

        let mut removed = 0u64;
        for partition in partitions {
            let keys = match key {
                Some(k) => vec![k.to_string()],
                None => self.list_keys(partition).await,
            };
            for key in keys {
                if self.delete(partition, &key).await {
                    removed += 1;
                }
            }
        }

        info!(
            "Invalidated {} entries (partition: {}, key: {})",
            removed,
            partition.map(|p| p.as_str()).unwrap_or("*"),
            key.unwrap_or("*")
        );
        removed
    }

    /// Entry count per partition name
    pub async fn status(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for partition in Partition::ALL {
            let count = match self.storage.count(partition.as_str()).await {
                Ok(count) => count,
                Err(e) => {
                    warn!("Failed to count entries in {}: {}", partition, e);
                    0
                }
            };
            counts.insert(partition.as_str().to_string(), count);
        }
        counts
    }

    /// Delete every expired entry without waiting for it to be read
    pub async fn purge_expired(&self) -> u64 {
        let now = self.clock.now();
        let mut purged = 0u64;

        for config in self.registry.iter() {
            let stamps = match self.storage.list_stamps(config.name()).await {
                Ok(stamps) => stamps,
                Err(e) => {
                    warn!("Failed to list {} for expiry: {}", config.name(), e);
                    continue;
                }
            };

            for stamp in stamps {
                let expired = stamp
                    .cached_at
                    .is_some_and(|at| now - at > config.max_age);
                if expired && self.delete_if_expired(config.partition, &stamp.key).await {
                    purged += 1;
                }
            }
        }

        if purged > 0 {
            self.stats.write().expired += purged;
            info!("Purged {} expired entries", purged);
        }
        purged
    }

    fn key_lock(&self, partition: Partition, key: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        (partition, key).hash(&mut hasher);
        &self.key_locks[(hasher.finish() % KEY_LOCK_STRIPES as u64) as usize]
    }

    /// Delete `key` only if the entry stored now is still expired. An entry
    /// rewritten since the caller's read is kept.
    async fn delete_if_expired(&self, partition: Partition, key: &str) -> bool {
        let _guard = self.key_lock(partition, key).lock().await;

        match self.storage.read(partition.as_str(), key).await {
            Ok(Some(current)) if self.is_expired(partition, &current) => {
                self.delete(partition, key).await
            }
            Ok(_) => false,
            Err(e) => {
                warn!("Failed to re-read expired {} in {}: {}", key, partition, e);
                false
            }
        }
    }

    fn is_expired(&self, partition: Partition, entry: &CacheEntry) -> bool {
        let max_age = self.registry.get(partition).max_age;
        entry
            .cached_at
            .is_some_and(|at| self.clock.now() - at > max_age)
    }

    fn record_hit(&self, partition: Partition) {
        self.stats.write().hits += 1;
        metrics::counter!("fieldcache_cache_hits_total", "partition" => partition.as_str())
            .increment(1);
    }

    fn record_miss(&self, partition: Partition) {
        self.stats.write().misses += 1;
        metrics::counter!("fieldcache_cache_misses_total", "partition" => partition.as_str())
            .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::PartitionOverride;
    use crate::test_support::SlowReads;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use fieldcache_storage::{MemoryStorage, StorageError};
    use std::collections::HashMap;

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn store_with(registry: PartitionRegistry) -> (ContentStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let store = ContentStore::new(Arc::new(MemoryStorage::new()), registry, clock.clone());
        (store, clock)
    }

    fn response(body: &str) -> ResourceResponse {
        ResourceResponse::new(200, body.to_string())
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (store, _) = store_with(PartitionRegistry::default());
        let entry = store.entry_for("GET https://crm.local/app.js", Partition::Static, &response("js"));
        store.put(Partition::Static, entry).await;

        let hit = store.get(Partition::Static, "GET https://crm.local/app.js").await.unwrap();
        assert_eq!(hit.body.as_ref(), b"js");
        assert_eq!(hit.cached_at, Some(start()));
        assert!(store.get(Partition::Images, "GET https://crm.local/app.js").await.is_none());

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn test_oldest_insertion_is_evicted() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "api".to_string(),
            PartitionOverride {
                max_entries: Some(2),
                max_age_secs: None,
            },
        );
        let (store, clock) = store_with(PartitionRegistry::with_overrides(&overrides).unwrap());

        for key in ["k1", "k2", "k3"] {
            clock.advance(Duration::seconds(1));
            let entry = store.entry_for(key, Partition::Api, &response(key));
            store.put(Partition::Api, entry).await;
            assert!(store.list_keys(Partition::Api).await.len() <= 2);
        }

        let mut keys = store.list_keys(Partition::Api).await;
        keys.sort();
        assert_eq!(keys, vec!["k2".to_string(), "k3".to_string()]);
        assert_eq!(store.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_reading_keeps_insertion_order() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "fonts".to_string(),
            PartitionOverride {
                max_entries: Some(2),
                max_age_secs: None,
            },
        );
        let (store, clock) = store_with(PartitionRegistry::with_overrides(&overrides).unwrap());

        for key in ["a", "b"] {
            clock.advance(Duration::seconds(1));
            store.put(Partition::Fonts, store.entry_for(key, Partition::Fonts, &response(key))).await;
        }
        // A read does not refresh `a`
        assert!(store.get(Partition::Fonts, "a").await.is_some());
        clock.advance(Duration::seconds(1));
        store.put(Partition::Fonts, store.entry_for("c", Partition::Fonts, &response("c"))).await;

        assert!(store.get(Partition::Fonts, "a").await.is_none());
        assert!(store.get(Partition::Fonts, "b").await.is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_is_deleted_on_read() {
        let (store, clock) = store_with(PartitionRegistry::default());
        let key = "GET https://crm.local/api/leads";
        store.put(Partition::Api, store.entry_for(key, Partition::Api, &response("[]"))).await;

        // Exactly max age is still fresh
        clock.advance(Duration::minutes(5));
        assert!(store.get(Partition::Api, key).await.is_some());

        clock.advance(Duration::seconds(1));
        assert!(store.get(Partition::Api, key).await.is_none());
        assert!(store.list_keys(Partition::Api).await.is_empty());
        assert_eq!(store.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_entry_without_timestamp_does_not_expire() {
        let (store, clock) = store_with(PartitionRegistry::default());
        let mut entry = store.entry_for("legacy", Partition::Api, &response("{}"));
        entry.cached_at = None;
        store.put(Partition::Api, entry).await;

        clock.advance(Duration::days(400));
        assert!(store.get(Partition::Api, "legacy").await.is_some());
        assert_eq!(store.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, clock) = store_with(PartitionRegistry::default());
        store.put(Partition::Api, store.entry_for("api", Partition::Api, &response("1"))).await;
        store
            .put(Partition::Static, store.entry_for("js", Partition::Static, &response("2")))
            .await;

        clock.advance(Duration::hours(1));
        assert_eq!(store.purge_expired().await, 1);

        let status = store.status().await;
        assert_eq!(status["api"], 0);
        assert_eq!(status["static"], 1);
    }

    #[tokio::test]
    async fn test_invalidate_scopes() {
        let (store, _) = store_with(PartitionRegistry::default());
        for (partition, key) in [
            (Partition::Api, "a1"),
            (Partition::Api, "a2"),
            (Partition::Images, "i1"),
            (Partition::Static, "s1"),
        ] {
            store.put(partition, store.entry_for(key, partition, &response(key))).await;
        }

        assert_eq!(store.invalidate(Some(Partition::Api), Some("a1")).await, 1);
        assert_eq!(store.invalidate(Some(Partition::Api), Some("missing")).await, 0);
        assert_eq!(store.invalidate(Some(Partition::Images), None).await, 1);
        assert_eq!(store.invalidate(None, None).await, 2);

        let status = store.status().await;
        assert_eq!(status.len(), 6);
        assert!(status.values().all(|&count| count == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_keeps_entry_rewritten_during_read() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(ContentStore::new(
            SlowReads::new(std::time::Duration::from_millis(50)),
            PartitionRegistry::default(),
            clock.clone(),
        ));
        let key = "GET https://crm.local/reports";
        store
            .put(Partition::Dynamic, store.entry_for(key, Partition::Dynamic, &response("stale")))
            .await;
        clock.advance(Duration::days(8));

        let reader = tokio::spawn({
            let store = store.clone();
            async move { store.get(Partition::Dynamic, key).await }
        });
        // The reader holds its stale snapshot while the rewrite lands
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        store
            .put(Partition::Dynamic, store.entry_for(key, Partition::Dynamic, &response("fresh")))
            .await;

        assert!(reader.await.unwrap().is_none());
        assert_eq!(store.list_keys(Partition::Dynamic).await, vec![key.to_string()]);
        let current = store.get(Partition::Dynamic, key).await.unwrap();
        assert_eq!(current.body.as_ref(), b"fresh");
        assert_eq!(store.stats().expired, 0);
    }

    /// Backend whose every operation fails
    struct BrokenStorage;

    #[async_trait]
    impl StorageBackend for BrokenStorage {
        async fn open(&self, _partition: &str) -> Result<(), StorageError> {
            Err(StorageError::Backend("disk gone".to_string()))
        }
        async fn read(&self, _p: &str, _k: &str) -> Result<Option<CacheEntry>, StorageError> {
            Err(StorageError::Backend("disk gone".to_string()))
        }
        async fn write(&self, _p: &str, _e: &CacheEntry) -> Result<(), StorageError> {
            Err(StorageError::Backend("disk gone".to_string()))
        }
        async fn delete(&self, _p: &str, _k: &str) -> Result<bool, StorageError> {
            Err(StorageError::Backend("disk gone".to_string()))
        }
        async fn list_keys(&self, _p: &str) -> Result<Vec<String>, StorageError> {
            Err(StorageError::Backend("disk gone".to_string()))
        }
    }

    #[tokio::test]
    async fn test_storage_failures_are_swallowed() {
        let store = ContentStore::new(
            Arc::new(BrokenStorage),
            PartitionRegistry::default(),
            Arc::new(ManualClock::new(start())),
        );

        store.put(Partition::Api, store.entry_for("k", Partition::Api, &response("x"))).await;
        assert!(store.get(Partition::Api, "k").await.is_none());
        assert!(!store.delete(Partition::Api, "k").await);
        assert_eq!(store.invalidate(None, None).await, 0);
        assert_eq!(store.status().await["api"], 0);
        assert!(store.open(Partition::Api).await.is_err());
    }
}
