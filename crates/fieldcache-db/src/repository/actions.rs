//! Pending action operations

use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::error::DbError;
use crate::models::{NewPendingAction, PendingAction};
use crate::repository::Database;

const ACTION_COLUMNS: &str = "seq, id, category, payload, target_endpoint, method, created_at, retry_count, max_retries, last_error";

/// Number of pending actions in one category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

impl Database {
    // ==================== Pending Action Operations ====================

    /// Persist a new pending action at the tail of its category
    pub async fn insert_pending_action(
        &self,
        action: NewPendingAction,
    ) -> Result<PendingAction, DbError> {
        let payload = serde_json::to_string(&action.payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO pending_actions (id, category, payload, target_endpoint, method, created_at, retry_count, max_retries)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            RETURNING seq
            "#,
        )
        .bind(&action.id)
        .bind(&action.category)
        .bind(&payload)
        .bind(&action.target_endpoint)
        .bind(&action.method)
        .bind(action.created_at.to_rfc3339())
        .bind(action.max_retries as i64)
        .fetch_one(&self.pool)
        .await?;

        let seq: i64 = result.get("seq");

        Ok(PendingAction {
            id: action.id,
            seq,
            category: action.category,
            payload: action.payload,
            target_endpoint: action.target_endpoint,
            method: action.method,
            created_at: action.created_at,
            retry_count: 0,
            max_retries: action.max_retries,
            last_error: None,
        })
    }

    /// Get a pending action by id
    pub async fn get_pending_action(&self, id: &str) -> Result<Option<PendingAction>, DbError> {
        let result = sqlx::query(&format!(
            "SELECT {} FROM pending_actions WHERE id = ?",
            ACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        result
            .map(|row| PendingAction::try_from(&row).map_err(DbError::from))
            .transpose()
    }

    /// List pending actions in FIFO order, optionally restricted to a category
    pub async fn list_pending_actions(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<PendingAction>, DbError> {
        let rows = match category {
            Some(category) => {
                sqlx::query(&format!(
                    "SELECT {} FROM pending_actions WHERE category = ? ORDER BY seq ASC",
                    ACTION_COLUMNS
                ))
                .bind(category)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM pending_actions ORDER BY seq ASC",
                    ACTION_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter()
            .map(|row| PendingAction::try_from(row).map_err(DbError::from))
            .collect()
    }

    /// Record a failed attempt and return the new retry count
    pub async fn record_action_failure(&self, id: &str, error: &str) -> Result<u32, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE pending_actions
            SET retry_count = retry_count + 1, last_error = ?
            WHERE id = ?
            RETURNING retry_count
            "#,
        )
        .bind(error)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match result {
            Some(row) => {
                let count: i64 = row.get("retry_count");
                Ok(count.max(0) as u32)
            }
            None => Err(DbError::NotFound(format!("Pending action: {}", id))),
        }
    }

    /// Delete a pending action
    pub async fn delete_pending_action(&self, id: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM pending_actions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count pending actions grouped by category
    pub async fn count_pending_by_category(&self) -> Result<Vec<CategoryCount>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT category, COUNT(*) as count
            FROM pending_actions
            GROUP BY category
            ORDER BY category ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| CategoryCount {
                category: row.get("category"),
                count: row.get("count"),
            })
            .collect())
    }
}
