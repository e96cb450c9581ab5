//! Fieldcache - Offline-first caching and sync engine

use anyhow::{Result, bail};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, LoggingConfig};
use fieldcache_api::{AppState, create_router};
use fieldcache_core::{
    Dispatcher, Engine, SystemClock, spawn_connectivity_watcher, spawn_maintenance_task,
};
use fieldcache_db::Database;
use fieldcache_proxy::HttpTransport;
use fieldcache_storage::{LocalStorage, MemoryStorage, StorageBackend};

/// Fieldcache - Offline-first caching and sync engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "FIELDCACHE_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "FIELDCACHE_PORT")]
    port: Option<u16>,

    /// Origin server URL
    #[arg(long, env = "FIELDCACHE_UPSTREAM")]
    upstream: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)?;
    if let Some(upstream) = args.upstream {
        config.upstream.url = upstream;
    }

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Fieldcache v{}", env!("CARGO_PKG_VERSION"));

    // Install the Prometheus recorder before anything records metrics
    let metrics_handle = if config.metrics.enabled {
        Some(Arc::new(PrometheusBuilder::new().install_recorder()?))
    } else {
        None
    };

    // Initialize database
    if let Some(parent) = Path::new(&config.database.path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let db = Database::open_path(&config.database.path).await?;

    // Initialize storage backend
    let storage: Arc<dyn StorageBackend> = match config.storage.backend.as_str() {
        "local" => {
            tokio::fs::create_dir_all(&config.storage.path).await?;
            Arc::new(LocalStorage::new(&config.storage.path).await?)
        }
        "memory" => Arc::new(MemoryStorage::new()),
        other => bail!("Unknown storage backend: {}", other),
    };

    // Initialize engine
    let transport = Arc::new(HttpTransport::new(config.network.skip_tls_verify)?);
    let engine = Engine::start(
        config.engine_config(),
        storage,
        db,
        transport,
        Arc::new(SystemClock),
    )
    .await?;

    let (dispatcher, dispatcher_task) = Dispatcher::spawn(engine.clone(), 256);

    // Start background tasks
    let maintenance =
        spawn_maintenance_task(engine.clone(), config.sync.maintenance_interval_secs);
    let watcher = spawn_connectivity_watcher(engine.clone(), engine.connectivity());

    // Create router
    let state = AppState::new(engine.clone(), dispatcher);
    let app = create_router(state, metrics_handle).layer(TraceLayer::new_for_http());

    // Determine bind address
    let bind_addr = args.bind.unwrap_or(config.server.bind_address);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind_addr, port).parse()?;

    info!("Listening on {}", addr);
    info!("Origin: {}", config.upstream.url);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    maintenance.abort();
    watcher.abort();
    dispatcher_task.abort();
    engine.shutdown().await;

    info!("Server stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }

    info!("Shutdown signal received");
}
