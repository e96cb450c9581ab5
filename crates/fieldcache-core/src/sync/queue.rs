//! Sync queue over the pending action table

use std::collections::HashSet;
use std::sync::Arc;

use fieldcache_db::{CategoryCount, Database, NewPendingAction, PendingAction};
use fieldcache_proxy::{NetworkClient, ResourceRequest};
use futures::future::join_all;
use http::Method;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{DrainReport, NewAction, SyncResult};
use crate::clock::Clock;
use crate::error::CoreError;
use crate::events::{Event, EventBus};

/// Durable FIFO of pending mutating actions
pub struct SyncQueue {
    db: Database,
    client: Arc<NetworkClient>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    default_max_retries: u32,
    /// Ids of actions currently being executed by some drain
    claimed: Mutex<HashSet<String>>,
}

/// Releases a claim when dropped, including on error or cancellation
struct Claim<'a> {
    queue: &'a SyncQueue,
    id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.queue.claimed.lock().remove(&self.id);
    }
}

enum Outcome {
    Succeeded,
    Retained,
    Dropped(String),
}

impl SyncQueue {
    pub fn new(
        db: Database,
        client: Arc<NetworkClient>,
        events: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        default_max_retries: u32,
    ) -> Self {
        Self {
            db,
            client,
            events,
            clock,
            default_max_retries,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Persist an action. It is durable once this returns.
    pub async fn enqueue(&self, action: NewAction) -> Result<PendingAction, CoreError> {
        if action.category.trim().is_empty() {
            return Err(CoreError::BadRequest("category must not be empty".to_string()));
        }
        let method = Method::from_bytes(action.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| CoreError::BadRequest(format!("invalid method: {}", action.method)))?;
        // Validates the endpoint up front so a bad URL is never queued
        ResourceRequest::new(method.clone(), &action.target_endpoint)?;

        let pending = self
            .db
            .insert_pending_action(NewPendingAction {
                id: uuid::Uuid::new_v4().to_string(),
                category: action.category,
                payload: action.payload,
                target_endpoint: action.target_endpoint,
                method: method.to_string(),
                created_at: self.clock.now(),
                max_retries: action.max_retries.unwrap_or(self.default_max_retries),
            })
            .await?;

        info!(
            "Queued action {} ({} {}) in {}",
            pending.id, pending.method, pending.target_endpoint, pending.category
        );

        self.events.publish(Event::ActionQueued {
            action_id: pending.id.clone(),
            category: pending.category.clone(),
        });

        Ok(pending)
    }

    /// Pending actions in FIFO order
    pub async fn list(&self, category: Option<&str>) -> Result<Vec<PendingAction>, CoreError> {
        Ok(self.db.list_pending_actions(category).await?)
    }

    pub async fn pending_counts(&self) -> Result<Vec<CategoryCount>, CoreError> {
        Ok(self.db.count_pending_by_category().await?)
    }

    /// Replay the actions of one category in FIFO order
    pub async fn drain(&self, category: &str) -> Result<DrainReport, CoreError> {
        let actions = self.db.list_pending_actions(Some(category)).await?;
        let mut report = DrainReport {
            category: category.to_string(),
            ..DrainReport::default()
        };

        if actions.is_empty() {
            return Ok(report);
        }

        debug!("Draining {} actions in {}", actions.len(), category);

        for action in actions {
            let Some(_claim) = self.claim(&action.id) else {
                report.skipped += 1;
                continue;
            };

            // Another drain may have settled it between listing and claiming
            let Some(action) = self.db.get_pending_action(&action.id).await? else {
                continue;
            };

            report.attempted += 1;
            match self.execute(&action).await? {
                Outcome::Succeeded => {
                    report.results.push(self.finish(&action, None));
                }
                Outcome::Retained => report.retained += 1,
                Outcome::Dropped(error) => {
                    report.results.push(self.finish(&action, Some(error)));
                }
            }
        }

        info!(
            "Drained {}: {} succeeded, {} dropped, {} retained, {} skipped",
            category,
            report.succeeded(),
            report.dropped(),
            report.retained,
            report.skipped
        );

        Ok(report)
    }

    /// Drain every category that has pending actions, concurrently
    pub async fn drain_all(&self) -> Vec<DrainReport> {
        let categories = match self.db.count_pending_by_category().await {
            Ok(counts) => counts,
            Err(e) => {
                warn!("Failed to list pending categories: {}", e);
                return Vec::new();
            }
        };

        let drains = categories.iter().map(|c| self.drain(&c.category));
        join_all(drains)
            .await
            .into_iter()
            .zip(&categories)
            .filter_map(|(result, c)| match result {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("Drain of {} failed: {}", c.category, e);
                    None
                }
            })
            .collect()
    }

    fn claim(&self, id: &str) -> Option<Claim<'_>> {
        if self.claimed.lock().insert(id.to_string()) {
            Some(Claim {
                queue: self,
                id: id.to_string(),
            })
        } else {
            debug!("Action {} is held by another drain", id);
            None
        }
    }

    /// One attempt, then record the outcome in the queue
    async fn execute(&self, action: &PendingAction) -> Result<Outcome, CoreError> {
        let error = match self.replay(action).await {
            Ok(()) => {
                self.db.delete_pending_action(&action.id).await?;
                return Ok(Outcome::Succeeded);
            }
            Err(error) => error,
        };

        let attempts = self.db.record_action_failure(&action.id, &error).await?;
        if attempts < action.max_retries {
            debug!(
                "Action {} failed ({}/{}): {}",
                action.id, attempts, action.max_retries, error
            );
            return Ok(Outcome::Retained);
        }

        self.db.delete_pending_action(&action.id).await?;
        let exhausted = CoreError::QueueExhausted {
            action_id: action.id.clone(),
            attempts,
            last_error: error,
        };
        warn!("{}", exhausted);
        Ok(Outcome::Dropped(exhausted.to_string()))
    }

    async fn replay(&self, action: &PendingAction) -> Result<(), String> {
        let method = Method::from_bytes(action.method.as_bytes()).map_err(|e| e.to_string())?;
        let mut request =
            ResourceRequest::new(method, &action.target_endpoint).map_err(|e| e.to_string())?;

        match &action.payload {
            serde_json::Value::Null => {}
            serde_json::Value::String(raw) => {
                request = request.with_body(raw.clone());
            }
            value => {
                request = request
                    .with_header("content-type", "application/json")
                    .with_body(value.to_string());
            }
        }

        let response = self.client.send_once(&request).await.map_err(|e| e.to_string())?;
        if response.is_success() {
            Ok(())
        } else {
            Err(format!("upstream answered {}", response.status))
        }
    }

    fn finish(&self, action: &PendingAction, error: Option<String>) -> SyncResult {
        let result = SyncResult {
            action_id: action.id.clone(),
            category: action.category.clone(),
            success: error.is_none(),
            error,
        };

        let outcome = if result.success { "success" } else { "failure" };
        metrics::counter!("fieldcache_sync_results_total", "outcome" => outcome).increment(1);
        self.events.publish(Event::SyncComplete(result.clone()));
        result
    }
}
