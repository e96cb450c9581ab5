//! Network error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProxyError {
    /// Whether this failure is timeout-class
    pub fn is_timeout(&self) -> bool {
        match self {
            ProxyError::Timeout(_) => true,
            ProxyError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}
