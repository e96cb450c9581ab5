//! Fieldcache Database Layer
//!
//! This crate persists the sync queue of pending mutating actions in
//! SQLite via sqlx, so queued work survives a process restart.

pub mod error;
pub mod models;
pub mod repository;

pub use error::DbError;
pub use models::*;
pub use repository::{CategoryCount, Database};

/// Re-export sqlx types for convenience
pub use sqlx::SqlitePool;
