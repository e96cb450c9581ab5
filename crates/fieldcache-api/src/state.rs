//! Application state

use fieldcache_core::{Dispatcher, Engine};
use std::sync::Arc;

/// Prometheus recorder handle rendered by `/metrics`
pub type MetricsHandle = metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, dispatcher: Dispatcher) -> Self {
        Self { engine, dispatcher }
    }
}
