//! Engine instance
//!
//! Owns the content store, strategy executor, sync queue and event bus.
//! Built once with [`Engine::start`] and torn down with [`Engine::shutdown`].

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use fieldcache_db::{Database, PendingAction};
use fieldcache_proxy::{NetworkClient, ProxyError, ResourceRequest, ResourceResponse, Transport};
use fieldcache_storage::StorageBackend;

use crate::cache::{CacheStats, ContentStore};
use crate::classifier::{Classification, Classifier};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::events::{Event, EventBus, EventType, SubscriptionId};
use crate::partition::{Partition, PartitionRegistry};
use crate::strategy::{Intercepted, ResponseSource, StrategyExecutor};
use crate::sync::{DrainReport, NewAction, SyncQueue};

/// Snapshot returned by [`Engine::status`]
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Entry count per partition
    pub partitions: BTreeMap<String, usize>,
    pub stats: CacheStats,
    /// Pending action count per category
    pub pending: BTreeMap<String, i64>,
    pub online: bool,
}

/// Transport wrapper that records whether the network is reachable
struct MonitoredTransport {
    inner: Arc<dyn Transport>,
    online: Arc<watch::Sender<bool>>,
}

#[async_trait]
impl Transport for MonitoredTransport {
    async fn send(&self, request: &ResourceRequest) -> Result<ResourceResponse, ProxyError> {
        let result = self.inner.send(request).await;
        let reachable = result.is_ok();
        self.online.send_if_modified(|online| {
            if *online == reachable {
                return false;
            }
            *online = reachable;
            true
        });
        result
    }
}

pub struct Engine {
    config: EngineConfig,
    classifier: Classifier,
    store: Arc<ContentStore>,
    client: Arc<NetworkClient>,
    executor: StrategyExecutor,
    queue: SyncQueue,
    events: Arc<EventBus>,
    online: Arc<watch::Sender<bool>>,
    shut_down: AtomicBool,
}

impl Engine {
    /// Build an engine and open its partitions. Precaches the critical
    /// resources when `sync.precache_on_start` is set.
    pub async fn start(
        config: EngineConfig,
        storage: Arc<dyn StorageBackend>,
        db: Database,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, CoreError> {
        let registry = PartitionRegistry::with_overrides(&config.partitions)
            .map_err(|e| CoreError::InvalidPartition(e.to_string()))?;

        let store = Arc::new(ContentStore::new(storage, registry, clock.clone()));
        store.open_all().await?;

        let (online, _) = watch::channel(true);
        let online = Arc::new(online);
        let client = Arc::new(NetworkClient::new(
            Arc::new(MonitoredTransport {
                inner: transport,
                online: online.clone(),
            }),
            config.network.to_network_config(),
        ));

        let events = Arc::new(EventBus::new());
        let offline_key = Self::cache_key_for(&config, &config.classifier.offline_page)?;
        let executor =
            StrategyExecutor::new(store.clone(), client.clone(), events.clone(), offline_key);
        let queue = SyncQueue::new(
            db,
            client.clone(),
            events.clone(),
            clock,
            config.sync.max_retries,
        );

        let engine = Arc::new(Self {
            classifier: Classifier::new(&config.classifier),
            config,
            store,
            client,
            executor,
            queue,
            events,
            online,
            shut_down: AtomicBool::new(false),
        });

        if engine.config.sync.precache_on_start {
            let cached = engine.precache_critical().await;
            info!("Precached {} critical resources", cached);
        }

        info!("Engine started (origin: {})", engine.config.origin);
        Ok(engine)
    }

    fn cache_key_for(config: &EngineConfig, path: &str) -> Result<String, CoreError> {
        Ok(ResourceRequest::get(&config.resolve(path))?.cache_key())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn classify(&self, request: &ResourceRequest) -> Classification {
        self.classifier.classify(request)
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Watch the reachability of the network, as observed by outbound calls
    /// and [`Engine::set_online`]
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Report a connectivity change from an external signal source
    pub fn set_online(&self, online: bool) {
        self.online.send_replace(online);
    }

    fn ensure_running(&self) -> Result<(), CoreError> {
        if self.shut_down.load(Ordering::Acquire) {
            Err(CoreError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Classify a request and run it through its partition's strategy.
    ///
    /// Mutating requests go to the network once and are never cached. If
    /// that fails for an API category the request is queued for replay.
    pub async fn intercept(&self, request: ResourceRequest) -> Result<Intercepted, CoreError> {
        self.ensure_running()?;
        let classification = self.classifier.classify(&request);

        if request.is_read() {
            return Ok(self
                .executor
                .execute(&request, classification.partition)
                .await);
        }

        match self.client.send_once(&request).await {
            Ok(response) => Ok(Intercepted {
                response,
                source: ResponseSource::Network,
            }),
            Err(e) => {
                debug!("{} failed: {}", request.cache_key(), e);
                self.queue_failed_mutation(&request, classification).await
            }
        }
    }

    async fn queue_failed_mutation(
        &self,
        request: &ResourceRequest,
        classification: Classification,
    ) -> Result<Intercepted, CoreError> {
        let Some(category) = classification.resource_type else {
            return Ok(self.executor.fallback(request).await);
        };

        let payload = match &request.body {
            None => serde_json::Value::Null,
            Some(body) => serde_json::from_slice(body).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(body).into_owned())
            }),
        };

        let action = NewAction {
            category,
            payload,
            target_endpoint: request.canonical_url().to_string(),
            method: request.method.to_string(),
            max_retries: None,
        };

        match self.queue.enqueue(action).await {
            Ok(pending) => Ok(Intercepted::queued(&pending.id)),
            Err(e) => {
                warn!("Failed to queue {}: {}", request.cache_key(), e);
                Ok(Intercepted::service_unavailable())
            }
        }
    }

    /// Remove cached entries. `key` may be a store key, an absolute URL or a
    /// path relative to the origin.
    pub async fn invalidate(
        &self,
        partition: Option<&str>,
        key: Option<&str>,
    ) -> Result<u64, CoreError> {
        let partition = partition
            .map(|name| {
                name.parse::<Partition>()
                    .map_err(|e| CoreError::InvalidPartition(e.to_string()))
            })
            .transpose()?;

        let key = key.map(|k| self.normalize_key(k)).transpose()?;
        Ok(self.store.invalidate(partition, key.as_deref()).await)
    }

    fn normalize_key(&self, key: &str) -> Result<String, CoreError> {
        if key.contains(' ') {
            return Ok(key.to_string());
        }
        Self::cache_key_for(&self.config, key)
    }

    pub async fn status(&self) -> Result<EngineStatus, CoreError> {
        let pending = self
            .queue
            .pending_counts()
            .await?
            .into_iter()
            .map(|c| (c.category, c.count))
            .collect();

        Ok(EngineStatus {
            partitions: self.store.status().await,
            stats: self.store.stats(),
            pending,
            online: self.is_online(),
        })
    }

    /// Persist an action for replay. Relative endpoints are resolved against
    /// the origin.
    pub async fn enqueue_action(&self, mut action: NewAction) -> Result<PendingAction, CoreError> {
        self.ensure_running()?;
        action.target_endpoint = self.config.resolve(&action.target_endpoint);
        self.queue.enqueue(action).await
    }

    pub async fn list_actions(&self, category: Option<&str>) -> Result<Vec<PendingAction>, CoreError> {
        self.queue.list(category).await
    }

    pub async fn drain(&self, category: &str) -> Result<DrainReport, CoreError> {
        self.ensure_running()?;
        self.queue.drain(category).await
    }

    pub async fn drain_all(&self) -> Vec<DrainReport> {
        if self.ensure_running().is_err() {
            return Vec::new();
        }
        self.queue.drain_all().await
    }

    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.subscribe(event_type, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Fetch URLs and store them in the partition they classify to.
    /// Returns the number stored.
    pub async fn precache(&self, urls: &[String]) -> usize {
        let mut cached = 0;
        for url in urls {
            let resolved = self.config.resolve(url);
            let partition = match ResourceRequest::get(&resolved) {
                Ok(request) => self.classifier.classify(&request).partition,
                Err(e) => {
                    warn!("Skipping precache of {}: {}", url, e);
                    continue;
                }
            };
            if self.cache_into(&resolved, partition).await {
                cached += 1;
            }
        }
        cached
    }

    /// Fetch the critical allowlist and the offline page into `critical`
    pub async fn precache_critical(&self) -> usize {
        let mut paths = self.config.classifier.critical_resources.clone();
        if !paths.contains(&self.config.classifier.offline_page) {
            paths.push(self.config.classifier.offline_page.clone());
        }

        let mut cached = 0;
        for path in &paths {
            if self.cache_into(&self.config.resolve(path), Partition::Critical).await {
                cached += 1;
            }
        }
        cached
    }

    async fn cache_into(&self, url: &str, partition: Partition) -> bool {
        let request = match ResourceRequest::get(url) {
            Ok(request) => request,
            Err(e) => {
                warn!("Cannot precache {}: {}", url, e);
                return false;
            }
        };

        match self.client.send_once(&request).await {
            Ok(response) if response.is_success() => {
                let entry = self.store.entry_for(&request.cache_key(), partition, &response);
                self.store.put(partition, entry).await;
                true
            }
            Ok(response) => {
                warn!("Precache of {} answered {}", url, response.status);
                false
            }
            Err(e) => {
                warn!("Precache of {} failed: {}", url, e);
                false
            }
        }
    }

    /// Delete expired entries in every partition
    pub async fn purge_expired(&self) -> u64 {
        self.store.purge_expired().await
    }

    /// Stop accepting work and close the queue database
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.database().close().await;
        info!("Engine shut down");
    }
}
