//! Request and response types

use bytes::Bytes;
use http::Method;
use url::Url;

use crate::error::ProxyError;

/// Intent of a request as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Full-page navigation
    Navigate,
    /// Subresource or API call
    #[default]
    Other,
}

/// An outbound request. Identity is `(method, canonical url)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    pub method: Method,
    url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
}

impl ResourceRequest {
    /// Create a request for an absolute URL. The fragment is dropped.
    pub fn new(method: Method, url: &str) -> Result<Self, ProxyError> {
        let mut url = Url::parse(url)
            .map_err(|e| ProxyError::InvalidRequest(format!("{}: {}", url, e)))?;
        url.set_fragment(None);

        Ok(Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
            mode: RequestMode::Other,
        })
    }

    /// Create a GET request
    pub fn get(url: &str) -> Result<Self, ProxyError> {
        Self::new(Method::GET, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Mark this request as a full-page navigation
    pub fn navigate(self) -> Self {
        self.with_mode(RequestMode::Navigate)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Canonical URL string used in store keys
    pub fn canonical_url(&self) -> &str {
        self.url.as_str()
    }

    /// URL path component
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Store key, `"<METHOD> <canonical url>"`
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Whether the request only reads (and may therefore be cached or retried)
    pub fn is_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// Look up a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response returned by the network or synthesized by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ResourceResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// JSON response with a `content-type` header
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string()).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Look up a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_drops_fragment() {
        let a = ResourceRequest::get("https://crm.local/api/leads?page=2#top").unwrap();
        let b = ResourceRequest::get("https://crm.local/api/leads?page=2").unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "GET https://crm.local/api/leads?page=2");
    }

    #[test]
    fn test_method_is_part_of_identity() {
        let get = ResourceRequest::get("https://crm.local/api/leads").unwrap();
        let post = ResourceRequest::new(Method::POST, "https://crm.local/api/leads").unwrap();
        assert_ne!(get.cache_key(), post.cache_key());
        assert!(get.is_read());
        assert!(!post.is_read());
    }

    #[test]
    fn test_relative_url_is_rejected() {
        assert!(matches!(
            ResourceRequest::get("/api/leads"),
            Err(ProxyError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_response_success_range() {
        assert!(ResourceResponse::new(204, "").is_success());
        assert!(!ResourceResponse::new(304, "").is_success());
        assert!(!ResourceResponse::new(500, "").is_success());
    }
}
