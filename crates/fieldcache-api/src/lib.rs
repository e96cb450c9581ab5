//! Fieldcache HTTP API
//!
//! This crate provides the Axum-based HTTP surface: the intercepting proxy
//! fallback, the management API over the engine, health and metrics.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, MetricsHandle};
