//! Local disk storage backend

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{
    key_digest, validate_partition, CacheEntry, EntryStamp, StorageBackend,
};
use crate::error::StorageError;

const ENTRY_EXTENSION: &str = "entry";

/// Header line of an entry file. The body follows after the first newline.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    status: u16,
    #[serde(default)]
    headers: Vec<(String, String)>,
    #[serde(default)]
    cached_at: Option<DateTime<Utc>>,
}

/// Local disk storage backend
///
/// Each entry is one file holding a JSON metadata line followed by the raw
/// body: `<base_path>/partitions/<partition>/<first 2 chars>/<sha256(key)>.entry`.
/// Files are written to a unique temp name and renamed into place, so a
/// reader sees either the old or the new entry.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage backend
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(base_path.join("partitions")).await?;

        info!("Initialized local storage at {:?}", base_path);

        Ok(Self { base_path })
    }

    fn partition_path(&self, partition: &str) -> Result<PathBuf, StorageError> {
        validate_partition(partition)?;
        Ok(self.base_path.join("partitions").join(partition))
    }

    /// Get the file path for a key
    fn entry_path(&self, partition: &str, key: &str) -> Result<PathBuf, StorageError> {
        let digest = key_digest(key);
        let shard = &digest[..2];
        Ok(self
            .partition_path(partition)?
            .join(shard)
            .join(format!("{}.{}", digest, ENTRY_EXTENSION)))
    }

    /// Collect every entry file of a partition
    async fn entry_files(&self, partition: &str) -> Result<Vec<PathBuf>, StorageError> {
        let root = self.partition_path(partition)?;
        let mut files = Vec::new();

        let mut shards = match fs::read_dir(&root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(StorageError::Io(e)),
        };

        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                    files.push(path);
                }
            }
        }

        Ok(files)
    }

    /// Read only the metadata line of an entry file
    async fn read_meta(path: &Path) -> Result<Option<EntryMeta>, StorageError> {
        let file = match File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut line = String::new();
        BufReader::new(file).read_line(&mut line).await?;
        Ok(Some(serde_json::from_str(line.trim_end())?))
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn open(&self, partition: &str) -> Result<(), StorageError> {
        let path = self.partition_path(partition)?;
        fs::create_dir_all(&path).await?;
        debug!("Opened partition {} at {:?}", partition, path);
        Ok(())
    }

    async fn read(&self, partition: &str, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let path = self.entry_path(partition, key)?;

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let split = data
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| StorageError::Backend(format!("Corrupt entry file: {:?}", path)))?;

        let meta: EntryMeta = serde_json::from_slice(&data[..split])?;
        if meta.key != key {
            // Digest collision or a foreign file; treat as absent
            warn!("Entry file {:?} holds key {}, expected {}", path, meta.key, key);
            return Ok(None);
        }

        let body = Bytes::copy_from_slice(&data[split + 1..]);

        Ok(Some(CacheEntry {
            key: meta.key,
            partition: partition.to_string(),
            status: meta.status,
            headers: meta.headers,
            body,
            cached_at: meta.cached_at,
        }))
    }

    async fn write(&self, partition: &str, entry: &CacheEntry) -> Result<(), StorageError> {
        let path = self.entry_path(partition, &entry.key)?;
        debug!("Writing entry {} to {:?}", entry.key, path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let meta = EntryMeta {
            key: entry.key.clone(),
            status: entry.status,
            headers: entry.headers.clone(),
            cached_at: entry.cached_at,
        };

        let mut data = serde_json::to_vec(&meta)?;
        data.push(b'\n');
        data.extend_from_slice(&entry.body);

        // Unique temp name so concurrent writers of one key never share a file
        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        fs::write(&temp_path, &data).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }

        Ok(())
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<bool, StorageError> {
        let path = self.entry_path(partition, key)?;
        debug!("Deleting entry {} at {:?}", key, path);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list_keys(&self, partition: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .list_stamps(partition)
            .await?
            .into_iter()
            .map(|s| s.key)
            .collect())
    }

    async fn list_stamps(&self, partition: &str) -> Result<Vec<EntryStamp>, StorageError> {
        let mut stamps = Vec::new();

        for path in self.entry_files(partition).await? {
            match Self::read_meta(&path).await {
                Ok(Some(meta)) => stamps.push(EntryStamp {
                    key: meta.key,
                    cached_at: meta.cached_at,
                }),
                // Removed between listing and reading
                Ok(None) => {}
                Err(e) => {
                    warn!("Removing unreadable entry file {:?}: {}", path, e);
                    if let Err(e) = fs::remove_file(&path).await {
                        warn!("Failed to remove {:?}: {}", path, e);
                    }
                }
            }
        }

        Ok(stamps)
    }

    /// Counts readable entries only, matching what eviction sees
    async fn count(&self, partition: &str) -> Result<usize, StorageError> {
        Ok(self.list_stamps(partition).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn entry(key: &str, body: &'static [u8]) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            partition: "api".to_string(),
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from_static(body),
            cached_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        storage.open("api").await.unwrap();

        let e = entry("GET https://crm.local/api/leads", b"{\"leads\":[]}");
        storage.write("api", &e).await.unwrap();

        let read = storage.read("api", &e.key).await.unwrap().unwrap();
        assert_eq!(read, e);
    }

    #[tokio::test]
    async fn test_body_with_newlines_survives() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let e = entry("GET https://crm.local/notes", b"line one\nline two\n");
        storage.write("api", &e).await.unwrap();

        let read = storage.read("api", &e.key).await.unwrap().unwrap();
        assert_eq!(read.body, Bytes::from_static(b"line one\nline two\n"));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_entry() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let key = "GET https://crm.local/api/deals";
        storage.write("api", &entry(key, b"old")).await.unwrap();
        storage.write("api", &entry(key, b"new")).await.unwrap();

        let read = storage.read("api", key).await.unwrap().unwrap();
        assert_eq!(read.body, Bytes::from_static(b"new"));
        assert_eq!(storage.count("api").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        storage.write("api", &entry("k1", b"1")).await.unwrap();
        storage.write("api", &entry("k2", b"2")).await.unwrap();
        storage.write("images", &entry("k3", b"3")).await.unwrap();

        let mut keys = storage.list_keys("api").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["k1".to_string(), "k2".to_string()]);

        assert!(storage.delete("api", "k1").await.unwrap());
        assert!(!storage.delete("api", "k1").await.unwrap());
        assert_eq!(storage.list_keys("api").await.unwrap(), vec!["k2".to_string()]);
        assert_eq!(storage.count("images").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_removed() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        storage.write("api", &entry("k1", b"1")).await.unwrap();
        storage.write("api", &entry("k2", b"2")).await.unwrap();
        let corrupt = storage.entry_path("api", "k2").unwrap();
        fs::write(&corrupt, b"not json\nbody").await.unwrap();

        assert_eq!(storage.count("api").await.unwrap(), 1);
        assert_eq!(storage.list_keys("api").await.unwrap(), vec!["k1".to_string()]);
        assert!(!corrupt.exists());
    }

    #[tokio::test]
    async fn test_missing_partition_is_empty() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        assert!(storage.list_keys("fonts").await.unwrap().is_empty());
        assert!(storage.read("fonts", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal_partition() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let result = storage.write("../escape", &entry("k", b"x")).await;
        assert!(matches!(result, Err(StorageError::InvalidPartition(_))));
    }
}
