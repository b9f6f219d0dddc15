//! Dead-letter quarantine and recovery.
//!
//! Dead-lettering is a status on the same `document_queue` row, not a
//! separate store, so an item keeps its id, history, and retry count while
//! quarantined. Nothing moves an item into or out of `dead_letter`
//! automatically: [`DeadLetterQueue::move_to_dead_letter`] is for callers
//! that already know a document cannot succeed (corrupt input, a parser
//! that rejects the format), and [`DeadLetterQueue::retry_from_dead_letter`]
//! is the operator's way back.

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::info;

use docqueue_core::models::{now_millis, ErrorDetails};

use crate::error::QueueResult;

/// A quarantined queue item as shown to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetterItem {
    pub queue_id: i64,
    pub doc_id: String,
    pub source_name: String,
    pub run_id: String,
    pub error_message: Option<String>,
    pub error_details: Option<ErrorDetails>,
    pub retry_count: i64,
    pub claimed_by: Option<String>,
    pub parent_doc_id: Option<String>,
    pub created_at: i64,
    /// When the item entered `dead_letter`.
    pub dead_lettered_at: i64,
}

impl DeadLetterItem {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> QueueResult<Self> {
        let details: Option<String> = row.try_get("error_details")?;
        Ok(Self {
            queue_id: row.try_get("queue_id")?,
            doc_id: row.try_get("doc_id")?,
            source_name: row.try_get("source_name")?,
            run_id: row.try_get("run_id")?,
            error_message: row.try_get("error_message")?,
            error_details: details
                .as_deref()
                .map(serde_json::from_str::<ErrorDetails>)
                .transpose()?,
            retry_count: row.try_get("retry_count")?,
            claimed_by: row.try_get("claimed_by")?,
            parent_doc_id: row.try_get("parent_doc_id")?,
            created_at: row.try_get("created_at")?,
            dead_lettered_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Clone)]
pub struct DeadLetterQueue {
    pool: SqlitePool,
}

impl DeadLetterQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Quarantine an item regardless of its current status.
    ///
    /// Returns `false` if no such item exists.
    pub async fn move_to_dead_letter(
        &self,
        queue_id: i64,
        error_message: &str,
        error_details: Option<&ErrorDetails>,
    ) -> QueueResult<bool> {
        let details = error_details.map(serde_json::to_string).transpose()?;

        let moved = sqlx::query(
            r#"
            UPDATE document_queue
            SET status = 'dead_letter',
                error_message = ?,
                error_details = ?,
                updated_at = ?
            WHERE queue_id = ?
            "#,
        )
        .bind(error_message)
        .bind(&details)
        .bind(now_millis())
        .bind(queue_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if moved > 0 {
            info!(queue_id, error = error_message, "moved to dead letter queue");
        }
        Ok(moved > 0)
    }

    /// Return a dead-lettered item to `pending` so any worker can claim it.
    ///
    /// Clears the claim but keeps `retry_count` and the recorded error.
    /// Returns `false` if the item does not exist or is not dead-lettered.
    pub async fn retry_from_dead_letter(&self, queue_id: i64) -> QueueResult<bool> {
        let reset = sqlx::query(
            r#"
            UPDATE document_queue
            SET status = 'pending', claimed_by = NULL, claimed_at = NULL, updated_at = ?
            WHERE queue_id = ? AND status = 'dead_letter'
            "#,
        )
        .bind(now_millis())
        .bind(queue_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if reset > 0 {
            info!(queue_id, "requeued from dead letter queue");
        }
        Ok(reset > 0)
    }

    /// Requeue every dead-lettered item of a run. Returns how many moved.
    pub async fn retry_all_from_dead_letter(&self, run_id: &str) -> QueueResult<u64> {
        let reset = sqlx::query(
            r#"
            UPDATE document_queue
            SET status = 'pending', claimed_by = NULL, claimed_at = NULL, updated_at = ?
            WHERE run_id = ? AND status = 'dead_letter'
            "#,
        )
        .bind(now_millis())
        .bind(run_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if reset > 0 {
            info!(run_id, count = reset, "requeued dead letter items");
        }
        Ok(reset)
    }

    /// Quarantined items, most recently dead-lettered first.
    pub async fn list_dead_letter_items(
        &self,
        run_id: Option<&str>,
        limit: i64,
    ) -> QueueResult<Vec<DeadLetterItem>> {
        let rows = sqlx::query(
            r#"
            SELECT queue_id, doc_id, source_name, run_id, error_message, error_details,
                   retry_count, claimed_by, parent_doc_id, created_at, updated_at
            FROM document_queue
            WHERE status = 'dead_letter' AND (?1 IS NULL OR run_id = ?1)
            ORDER BY updated_at DESC, queue_id DESC
            LIMIT ?2
            "#,
        )
        .bind(run_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(DeadLetterItem::from_row).collect()
    }

    pub async fn count_dead_letter_items(&self, run_id: Option<&str>) -> QueueResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM document_queue WHERE status = 'dead_letter' AND (?1 IS NULL OR run_id = ?1)",
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
