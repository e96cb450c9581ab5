//! Scripted transport and storage for engine tests

use async_trait::async_trait;
use fieldcache_proxy::{ProxyError, ResourceRequest, ResourceResponse, Transport};
use fieldcache_storage::{CacheEntry, EntryStamp, MemoryStorage, StorageBackend, StorageError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Answers from a URL table; unknown URLs and offline mode fail with a
/// network error. With a gate set, every call waits for a permit first.
#[derive(Default)]
pub(crate) struct StubTransport {
    responses: Mutex<HashMap<String, ResourceResponse>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl StubTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn respond(&self, url: &str, status: u16, body: &str) {
        self.responses
            .lock()
            .insert(url.to_string(), ResourceResponse::new(status, body.to_string()));
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Hold every subsequent call until the returned gate is notified
    pub(crate) fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&self, request: &ResourceRequest) -> Result<ResourceResponse, ProxyError> {
        self.calls.lock().push(request.cache_key());

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(ProxyError::Network("offline".to_string()));
        }

        self.responses
            .lock()
            .get(request.canonical_url())
            .cloned()
            .ok_or_else(|| ProxyError::Network(format!("no route to {}", request.canonical_url())))
    }
}

/// Never answers
pub(crate) struct HangingTransport;

#[async_trait]
impl Transport for HangingTransport {
    async fn send(&self, _request: &ResourceRequest) -> Result<ResourceResponse, ProxyError> {
        std::future::pending::<Result<ResourceResponse, ProxyError>>().await
    }
}

/// In-memory storage whose reads take a snapshot and then stall, so a
/// concurrent write can land before the reader resumes
pub(crate) struct SlowReads {
    inner: MemoryStorage,
    delay: Duration,
}

impl SlowReads {
    pub(crate) fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStorage::new(),
            delay,
        })
    }
}

#[async_trait]
impl StorageBackend for SlowReads {
    async fn open(&self, partition: &str) -> Result<(), StorageError> {
        self.inner.open(partition).await
    }

    async fn read(&self, partition: &str, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let snapshot = self.inner.read(partition, key).await;
        tokio::time::sleep(self.delay).await;
        snapshot
    }

    async fn write(&self, partition: &str, entry: &CacheEntry) -> Result<(), StorageError> {
        self.inner.write(partition, entry).await
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<bool, StorageError> {
        self.inner.delete(partition, key).await
    }

    async fn list_keys(&self, partition: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list_keys(partition).await
    }

    async fn list_stamps(&self, partition: &str) -> Result<Vec<EntryStamp>, StorageError> {
        self.inner.list_stamps(partition).await
    }

    async fn count(&self, partition: &str) -> Result<usize, StorageError> {
        self.inner.count(partition).await
    }
}
