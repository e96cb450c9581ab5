//! Storage backend trait

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::StorageError;

/// A cached response held in one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Store key, `"<METHOD> <canonical url>"`
    pub key: String,
    /// Partition the entry belongs to
    pub partition: String,
    /// HTTP status of the cached response
    pub status: u16,
    /// Response headers in arrival order
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
    /// When the entry was written; `None` for entries of unknown age
    pub cached_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Look up a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Key and write timestamp of an entry, used for eviction ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStamp {
    pub key: String,
    pub cached_at: Option<DateTime<Utc>>,
}

/// Storage backend trait
///
/// Implementations hold independent key/value regions ("partitions").
/// A write to an existing key replaces it; writes to the same key are
/// last-write-wins.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Prepare a partition for use. Idempotent.
    async fn open(&self, partition: &str) -> Result<(), StorageError>;

    /// Read an entry
    async fn read(&self, partition: &str, key: &str) -> Result<Option<CacheEntry>, StorageError>;

    /// Write an entry, replacing any existing entry with the same key
    async fn write(&self, partition: &str, entry: &CacheEntry) -> Result<(), StorageError>;

    /// Delete an entry, returns whether it existed
    async fn delete(&self, partition: &str, key: &str) -> Result<bool, StorageError>;

    /// List all keys in a partition
    async fn list_keys(&self, partition: &str) -> Result<Vec<String>, StorageError>;

    /// List keys together with their write timestamps
    async fn list_stamps(&self, partition: &str) -> Result<Vec<EntryStamp>, StorageError> {
        let mut stamps = Vec::new();
        for key in self.list_keys(partition).await? {
            if let Some(entry) = self.read(partition, &key).await? {
                stamps.push(EntryStamp {
                    key,
                    cached_at: entry.cached_at,
                });
            }
        }
        Ok(stamps)
    }

    /// Number of entries in a partition
    async fn count(&self, partition: &str) -> Result<usize, StorageError> {
        Ok(self.list_keys(partition).await?.len())
    }
}

/// Validate a partition name before it is used as a path component
pub fn validate_partition(partition: &str) -> Result<(), StorageError> {
    let valid = !partition.is_empty()
        && partition.len() <= 64
        && partition
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidPartition(partition.to_string()))
    }
}

/// Compute the SHA256 hex digest of a key, used for on-disk file names
pub fn key_digest(key: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}
