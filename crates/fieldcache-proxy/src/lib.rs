//! Fieldcache Network Client
//!
//! This crate provides the request/response types shared by the engine,
//! the transport abstraction, and the network client that layers timeouts
//! and exponential-backoff retries on top of it.

pub mod client;
pub mod error;
pub mod transport;
pub mod types;

pub use client::{NetworkClient, NetworkConfig};
pub use error::ProxyError;
pub use transport::{HttpTransport, Transport};
pub use types::{RequestMode, ResourceRequest, ResourceResponse};
