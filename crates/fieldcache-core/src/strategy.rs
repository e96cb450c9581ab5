//! Caching strategies
//!
//! Each partition's strategy decides between the content store and the
//! network. Network failures never reach the caller: they move the request
//! to the next state of its strategy and, at the end, to the fallback.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use fieldcache_proxy::{NetworkClient, ProxyError, ResourceRequest, ResourceResponse};
use fieldcache_storage::CacheEntry;

use crate::cache::ContentStore;
use crate::events::{Event, EventBus};
use crate::partition::{Partition, Strategy};

/// Where an intercepted response came from
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
    Network,
    Cache,
    OfflinePage,
    ServiceUnavailable,
    NotInCache,
    Queued,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::OfflinePage => "offline-page",
            ResponseSource::ServiceUnavailable => "service-unavailable",
            ResponseSource::NotInCache => "not-in-cache",
            ResponseSource::Queued => "queued",
        }
    }

    /// Whether the response is a substitute for unavailable content
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            ResponseSource::OfflinePage | ResponseSource::ServiceUnavailable
        )
    }
}

/// Response produced by `intercept`
#[derive(Debug, Clone, PartialEq)]
pub struct Intercepted {
    pub response: ResourceResponse,
    pub source: ResponseSource,
}

impl Intercepted {
    fn new(response: ResourceResponse, source: ResponseSource) -> Self {
        Self { response, source }
    }

    pub(crate) fn service_unavailable() -> Self {
        Self::new(
            ResourceResponse::json(
                503,
                &serde_json::json!({
                    "error": "offline",
                    "message": "Service unavailable",
                }),
            ),
            ResponseSource::ServiceUnavailable,
        )
    }

    fn not_in_cache() -> Self {
        Self::new(
            ResourceResponse::json(
                504,
                &serde_json::json!({
                    "error": "not-in-cache",
                    "message": "Resource not found in cache",
                }),
            ),
            ResponseSource::NotInCache,
        )
    }

    pub(crate) fn queued(action_id: &str) -> Self {
        Self::new(
            ResourceResponse::json(
                202,
                &serde_json::json!({
                    "queued": true,
                    "action_id": action_id,
                    "message": "Queued for sync when back online",
                }),
            ),
            ResponseSource::Queued,
        )
    }
}

fn from_entry(entry: CacheEntry) -> ResourceResponse {
    ResourceResponse {
        status: entry.status,
        headers: entry.headers,
        body: entry.body,
    }
}

/// Runs the strategy of a partition for read requests
#[derive(Clone)]
pub struct StrategyExecutor {
    store: Arc<ContentStore>,
    client: Arc<NetworkClient>,
    events: Arc<EventBus>,
    /// Store key of the offline page in the `critical` partition
    offline_key: String,
}

impl StrategyExecutor {
    pub fn new(
        store: Arc<ContentStore>,
        client: Arc<NetworkClient>,
        events: Arc<EventBus>,
        offline_key: String,
    ) -> Self {
        Self {
            store,
            client,
            events,
            offline_key,
        }
    }

    pub async fn execute(&self, request: &ResourceRequest, partition: Partition) -> Intercepted {
        let strategy = self.store.config(partition).strategy;
        debug!(
            "{} -> {} ({})",
            request.cache_key(),
            partition,
            strategy.as_str()
        );

        match strategy {
            Strategy::CacheFirst => self.cache_first(request, partition).await,
            Strategy::NetworkFirst => self.network_first(request, partition).await,
            Strategy::StaleWhileRevalidate => {
                self.stale_while_revalidate(request, partition).await
            }
            Strategy::CacheOnly => self.cache_only(request, partition).await,
        }
    }

    async fn cache_first(&self, request: &ResourceRequest, partition: Partition) -> Intercepted {
        if let Some(entry) = self.store.get(partition, &request.cache_key()).await {
            return Intercepted::new(from_entry(entry), ResponseSource::Cache);
        }

        match self.fetch_and_store(request, partition).await {
            Ok(response) => Intercepted::new(response, ResponseSource::Network),
            Err(e) => {
                debug!("Fetch failed for {}: {}", request.cache_key(), e);
                self.fallback(request).await
            }
        }
    }

    async fn network_first(&self, request: &ResourceRequest, partition: Partition) -> Intercepted {
        match self.fetch_and_store(request, partition).await {
            Ok(response) => Intercepted::new(response, ResponseSource::Network),
            Err(e) => {
                debug!(
                    "Fetch failed for {}, trying cache: {}",
                    request.cache_key(),
                    e
                );
                match self.store.get(partition, &request.cache_key()).await {
                    Some(entry) => Intercepted::new(from_entry(entry), ResponseSource::Cache),
                    None => self.fallback(request).await,
                }
            }
        }
    }

    async fn stale_while_revalidate(
        &self,
        request: &ResourceRequest,
        partition: Partition,
    ) -> Intercepted {
        let revalidation = tokio::spawn({
            let executor = self.clone();
            let request = request.clone();
            async move { executor.fetch_and_store(&request, partition).await }
        });

        if let Some(entry) = self.store.get(partition, &request.cache_key()).await {
            // Detach: the fetch finishes its cache write on its own
            let events = self.events.clone();
            let key = request.cache_key();
            tokio::spawn(async move {
                match revalidation.await {
                    Ok(Ok(response)) if response.is_success() => {
                        debug!("Revalidated {}", key);
                        events.publish(Event::CacheUpdated { partition, key });
                    }
                    Ok(Ok(response)) => {
                        debug!("Revalidation of {} answered {}", key, response.status)
                    }
                    Ok(Err(e)) => warn!("Revalidation of {} failed: {}", key, e),
                    Err(e) => warn!("Revalidation task for {} aborted: {}", key, e),
                }
            });
            return Intercepted::new(from_entry(entry), ResponseSource::Cache);
        }

        match revalidation.await {
            Ok(Ok(response)) => Intercepted::new(response, ResponseSource::Network),
            Ok(Err(e)) => {
                debug!("Fetch failed for {}: {}", request.cache_key(), e);
                self.fallback(request).await
            }
            Err(e) => {
                warn!("Fetch task for {} aborted: {}", request.cache_key(), e);
                self.fallback(request).await
            }
        }
    }

    async fn cache_only(&self, request: &ResourceRequest, partition: Partition) -> Intercepted {
        match self.store.get(partition, &request.cache_key()).await {
            Some(entry) => Intercepted::new(from_entry(entry), ResponseSource::Cache),
            None => Intercepted::not_in_cache(),
        }
    }

    /// Fetch with retries; successful GET responses are written to the store
    async fn fetch_and_store(
        &self,
        request: &ResourceRequest,
        partition: Partition,
    ) -> Result<ResourceResponse, ProxyError> {
        let response = self.client.fetch(request).await?;

        if response.is_success() && request.method == http::Method::GET {
            let entry = self.store.entry_for(&request.cache_key(), partition, &response);
            self.store.put(partition, entry).await;
        } else if !response.is_success() {
            debug!(
                "Not caching {}: status {}",
                request.cache_key(),
                response.status
            );
        }

        Ok(response)
    }

    /// Offline page for navigations, service unavailable otherwise
    pub async fn fallback(&self, request: &ResourceRequest) -> Intercepted {
        let navigation = request.is_navigation();

        let result = if navigation {
            match self.store.get(Partition::Critical, &self.offline_key).await {
                Some(entry) => Intercepted::new(from_entry(entry), ResponseSource::OfflinePage),
                None => {
                    warn!("Offline page {} is not cached", self.offline_key);
                    Intercepted::service_unavailable()
                }
            }
        } else {
            Intercepted::service_unavailable()
        };

        metrics::counter!("fieldcache_fallbacks_total", "source" => result.source.as_str())
            .increment(1);
        self.events.publish(Event::OfflineFallbackServed {
            url: request.canonical_url().to_string(),
            navigation,
        });

        result
    }
}
