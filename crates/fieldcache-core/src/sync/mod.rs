//! Durable sync queue
//!
//! Mutating requests that could not reach the network are persisted here
//! and replayed in FIFO order per category.

mod queue;

pub use queue::SyncQueue;

use serde::{Deserialize, Serialize};

/// A mutating request to persist for later replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAction {
    /// Category the action is drained under (e.g. "leads")
    pub category: String,
    /// Request body; strings are replayed verbatim, other values as JSON
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Absolute URL the action is replayed against
    pub target_endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Attempts before the action is dropped; the queue default if unset
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Terminal outcome of one queued action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResult {
    pub action_id: String,
    pub category: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one drain pass over a category
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DrainReport {
    pub category: String,
    /// Actions executed during this pass
    pub attempted: usize,
    /// Actions left queued after a failed attempt
    pub retained: usize,
    /// Actions skipped because another drain held them
    pub skipped: usize,
    /// Terminal outcomes, in queue order
    pub results: Vec<SyncResult>,
}

impl DrainReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn dropped(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}
