//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

/// A mutating request waiting to be replayed against the network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingAction {
    pub id: String,
    /// FIFO position; assigned by the database on insert
    #[serde(skip)]
    pub seq: i64,
    /// Resource category the action belongs to (e.g. "leads")
    pub category: String,
    /// JSON request body
    pub payload: serde_json::Value,
    pub target_endpoint: String,
    pub method: String,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Error text of the most recent failed attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Data required to persist a new pending action
#[derive(Debug, Clone)]
pub struct NewPendingAction {
    pub id: String,
    pub category: String,
    pub payload: serde_json::Value,
    pub target_endpoint: String,
    pub method: String,
    pub created_at: DateTime<Utc>,
    pub max_retries: u32,
}

/// Decode an RFC3339 `created_at` column
fn parse_created_at(value: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

// ==================== TryFrom Implementations ====================

impl TryFrom<&sqlx::sqlite::SqliteRow> for PendingAction {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        let payload_str: String = row.try_get("payload")?;
        let payload = serde_json::from_str(&payload_str)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let retry_count: i64 = row.try_get("retry_count")?;
        let max_retries: i64 = row.try_get("max_retries")?;

        Ok(PendingAction {
            id: row.try_get("id")?,
            seq: row.try_get("seq")?,
            category: row.try_get("category")?,
            payload,
            target_endpoint: row.try_get("target_endpoint")?,
            method: row.try_get("method")?,
            created_at: parse_created_at(&row.try_get::<String, _>("created_at")?)?,
            retry_count: retry_count.max(0) as u32,
            max_retries: max_retries.max(0) as u32,
            last_error: row.try_get("last_error")?,
        })
    }
}
