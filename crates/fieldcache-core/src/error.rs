//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] fieldcache_db::DbError),

    #[error("Storage error: {0}")]
    Storage(#[from] fieldcache_storage::StorageError),

    #[error("Network error: {0}")]
    Proxy(#[from] fieldcache_proxy::ProxyError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid partition: {0}")]
    InvalidPartition(String),

    #[error("Action {action_id} exhausted {attempts} attempts: {last_error}")]
    QueueExhausted {
        action_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Engine is shut down")]
    ShutDown,
}
