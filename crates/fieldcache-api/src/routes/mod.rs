//! API routes

mod health;
mod management;
pub mod metrics;
pub mod proxy;

use axum::{Router, extract::DefaultBodyLimit};
use std::sync::Arc;

use crate::state::{AppState, MetricsHandle};

/// Create the main router
pub fn create_router(state: AppState, metrics_handle: Option<Arc<MetricsHandle>>) -> Router {
    let mut router = Router::new()
        // Health check
        .merge(health::routes())
        // Management API
        .merge(management::routes())
        // Everything else goes through the engine
        .fallback(proxy::intercept)
        .with_state(state)
        .layer(DefaultBodyLimit::max(16 * 1024 * 1024));

    // Add metrics endpoint if handle is provided
    if let Some(handle) = metrics_handle {
        router = router.merge(metrics::routes(handle));
    }

    router
}
