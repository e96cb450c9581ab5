//! Network client with timeout and exponential-backoff retry

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ProxyError;
use crate::transport::Transport;
use crate::types::{ResourceRequest, ResourceResponse};

/// Network client configuration
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Attempts made by the retry loop
    pub max_retries: u32,
    /// Delay after the first failed attempt; doubles after each further one
    pub base_delay: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Network client wrapping a [`Transport`]
pub struct NetworkClient {
    transport: Arc<dyn Transport>,
    config: NetworkConfig,
}

impl NetworkClient {
    /// Create a new network client
    pub fn new(transport: Arc<dyn Transport>, config: NetworkConfig) -> Self {
        debug!(
            "Network client (timeout: {:?}, retries: {}, base delay: {:?})",
            config.timeout, config.max_retries, config.base_delay
        );
        Self { transport, config }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Issue a single call, aborting it once `timeout` has elapsed.
    ///
    /// Dropping the transport future on timeout cancels the in-flight request.
    pub async fn call_with_timeout(
        &self,
        request: &ResourceRequest,
        timeout: Duration,
    ) -> Result<ResourceResponse, ProxyError> {
        match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(
                    "Request {} timed out after {:?}",
                    request.cache_key(),
                    timeout
                );
                Err(ProxyError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Call with retries. After failed attempt `n` (0-based) the client
    /// waits `base_delay * 2^n`; once `max_retries` attempts have failed the
    /// last failure is returned. A response with any status is a success.
    pub async fn call_with_retry(
        &self,
        request: &ResourceRequest,
        max_retries: u32,
        base_delay: Duration,
    ) -> Result<ResourceResponse, ProxyError> {
        let attempts = max_retries.max(1);
        let mut attempt = 0;

        loop {
            let error = match self.call_with_timeout(request, self.config.timeout).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            let delay = base_delay.saturating_mul(2u32.saturating_pow(attempt));
            warn!(
                "Attempt {}/{} for {} failed: {} (backing off {:?})",
                attempt + 1,
                attempts,
                request.cache_key(),
                error,
                delay
            );
            tokio::time::sleep(delay).await;

            attempt += 1;
            if attempt >= attempts {
                return Err(error);
            }
        }
    }

    /// Read path used by strategies: retry loop with configured defaults
    pub async fn fetch(&self, request: &ResourceRequest) -> Result<ResourceResponse, ProxyError> {
        self.call_with_retry(request, self.config.max_retries, self.config.base_delay)
            .await
    }

    /// Single timeout-bounded call with the configured timeout
    pub async fn send_once(
        &self,
        request: &ResourceRequest,
    ) -> Result<ResourceResponse, ProxyError> {
        self.call_with_timeout(request, self.config.timeout).await
    }
}
