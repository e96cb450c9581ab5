//! Network transport

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::error::ProxyError;
use crate::types::{ResourceRequest, ResourceResponse};

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Transport trait
///
/// Issues a single request and returns whatever status the peer answered
/// with. Only connection-level failures are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ResourceRequest) -> Result<ResourceResponse, ProxyError>;
}

/// reqwest-backed HTTP transport
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(skip_tls_verify: bool) -> Result<Self, ProxyError> {
        let mut builder = Client::builder()
            .user_agent(concat!("fieldcache/", env!("CARGO_PKG_VERSION")));

        if skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;

        info!("Created HTTP transport");

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ResourceRequest) -> Result<ResourceResponse, ProxyError> {
        debug!("{} {}", request.method, request.canonical_url());

        let mut builder = self
            .client
            .request(request.method.clone(), request.url().clone());

        for (name, value) in &request.headers {
            if !is_hop_by_hop(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();

        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await?;

        Ok(ResourceResponse {
            status,
            headers,
            body,
        })
    }
}
