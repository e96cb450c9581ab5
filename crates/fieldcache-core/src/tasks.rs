//! Background tasks

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tracing::{debug, info};

use crate::engine::Engine;

/// Spawn a task that periodically purges expired entries and retries the
/// sync queue while the network is reachable
pub fn spawn_maintenance_task(engine: Arc<Engine>, interval_secs: u64) -> JoinHandle<()> {
    info!(
        "Starting background maintenance task (interval: {} seconds)",
        interval_secs
    );

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            ticker.tick().await;
            debug!("Running scheduled maintenance");

            let purged = engine.purge_expired().await;
            let reports = if engine.is_online() {
                engine.drain_all().await
            } else {
                Vec::new()
            };

            let settled: usize = reports.iter().map(|r| r.results.len()).sum();
            if purged > 0 || settled > 0 {
                info!(
                    "Scheduled maintenance: {} expired removed, {} queued actions settled",
                    purged, settled
                );
            }
        }
    })
}

/// Spawn a task that drains the whole sync queue on every offline to online
/// transition of `connectivity`. Ends when the sender is dropped.
pub fn spawn_connectivity_watcher(
    engine: Arc<Engine>,
    mut connectivity: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut online = *connectivity.borrow_and_update();

    tokio::spawn(async move {
        while connectivity.changed().await.is_ok() {
            let now = *connectivity.borrow_and_update();
            if now && !online {
                info!("Connectivity restored, draining sync queue");
                let reports = engine.drain_all().await;
                debug!("Drained {} categories", reports.len());
            } else if !now && online {
                info!("Connectivity lost");
            }
            online = now;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::EngineConfig;
    use crate::events::{Event, EventType};
    use crate::sync::NewAction;
    use crate::test_support::StubTransport;
    use fieldcache_db::Database;
    use fieldcache_storage::MemoryStorage;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_restored_connectivity_drains_queue() {
        let dir = TempDir::new().unwrap();
        let transport = StubTransport::new();
        transport.respond("https://crm.local/api/contacts", 200, "{}");

        let mut config = EngineConfig {
            origin: "https://crm.local".to_string(),
            ..EngineConfig::default()
        };
        config.sync.precache_on_start = false;
        let db = Database::open_path(dir.path().join("queue.db").to_str().unwrap())
            .await
            .unwrap();
        let engine = Engine::start(
            config,
            Arc::new(MemoryStorage::new()),
            db,
            transport,
            Arc::new(SystemClock),
        )
        .await
        .unwrap();

        engine.set_online(false);
        engine
            .enqueue_action(NewAction {
                category: "contacts".to_string(),
                payload: serde_json::json!({ "email": "ada@example.com" }),
                target_endpoint: "/api/contacts".to_string(),
                method: "POST".to_string(),
                max_retries: None,
            })
            .await
            .unwrap();

        let (_id, mut results) = engine.events().subscribe_channel(EventType::SyncComplete);
        let _watcher = spawn_connectivity_watcher(engine.clone(), engine.connectivity());

        engine.set_online(true);

        match results.recv().await {
            Some(Event::SyncComplete(result)) => assert!(result.success),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(engine.list_actions(None).await.unwrap().is_empty());
    }
}
