//! The document work queue: atomic claim, completion, failure and retry.
//!
//! Every worker process builds its own [`WorkQueue`] bound to its worker
//! id, all pointing at the same database. There is no other shared state:
//! SQLite's single-writer lock is the lock manager.
//!
//! # Claiming
//!
//! [`WorkQueue::claim_next_document`] is one `UPDATE ... WHERE queue_id =
//! (SELECT ... LIMIT 1) RETURNING ...` statement. SQLite runs the
//! selection and the update under the same write lock, so two workers can
//! never come away holding the same row, and there is no gap between
//! "pick" and "mark" for another worker to slip into.
//!
//! An item is eligible when it is `pending`, `retry`, or `processing`
//! with a `claimed_at` older than the claim timeout (its worker is
//! presumed dead). Eligible items are handed out oldest-enqueued first.
//!
//! # Reporting
//!
//! Completion, failure and dead-letter escalation only apply to items
//! this worker currently holds: `processing` with `claimed_by` equal to
//! the queue's worker id. Anything else is a no-op that returns `false`.
//! A repeated report is harmless, and so is a late report from a worker
//! whose stale claim was taken over by another worker.
//!
//! Store errors are never swallowed: a lost claim or completion would make
//! the queue's accounting wrong, so they always reach the caller.

use std::time::Duration;

use serde_json::Value;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use docqueue_core::models::{
    now_millis, DocumentDependency, DocumentQueueItem, ErrorDetails, ProcessingStats,
    QueueStatus, QueueStatusCounts,
};

use crate::config::QueueConfig;
use crate::error::QueueResult;
use crate::rows::{count_by_status, dependency_from_row, item_from_row, ITEM_COLUMNS};

/// Per-queue tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueOptions {
    /// How long a claim may stay in `processing` before any worker may take it over.
    pub claim_timeout: Duration,
    /// Failures an item tolerates before it becomes `failed`.
    /// Stamped on each item when it is enqueued.
    pub max_retries: i64,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            claim_timeout: Duration::from_secs(300),
            max_retries: 3,
        }
    }
}

impl From<&QueueConfig> for QueueOptions {
    fn from(config: &QueueConfig) -> Self {
        Self {
            claim_timeout: config.claim_timeout(),
            max_retries: config.max_retries,
        }
    }
}

#[derive(Clone)]
pub struct WorkQueue {
    pool: SqlitePool,
    worker_id: String,
    options: QueueOptions,
}

impl WorkQueue {
    pub fn new(pool: SqlitePool, worker_id: impl Into<String>) -> Self {
        Self::with_options(pool, worker_id, QueueOptions::default())
    }

    pub fn with_options(pool: SqlitePool, worker_id: impl Into<String>, options: QueueOptions) -> Self {
        Self {
            pool,
            worker_id: worker_id.into(),
            options,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Enqueue a document as `pending` and return its queue id.
    ///
    /// Does not deduplicate: enqueueing the same `doc_id` twice in a run
    /// creates two items.
    pub async fn add_document(
        &self,
        doc_id: &str,
        source_name: &str,
        run_id: &str,
        metadata: Option<&Value>,
    ) -> QueueResult<i64> {
        let now = now_millis();
        let metadata = match metadata {
            Some(value) => serde_json::to_string(value)?,
            None => "{}".to_string(),
        };

        let queue_id = sqlx::query(
            r#"
            INSERT INTO document_queue (doc_id, source_name, run_id, status, retry_count,
                                        max_retries, metadata, created_at, updated_at)
            VALUES (?, ?, ?, 'pending', 0, ?, ?, ?, ?)
            "#,
        )
        .bind(doc_id)
        .bind(source_name)
        .bind(run_id)
        .bind(self.options.max_retries)
        .bind(&metadata)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        debug!(queue_id, doc_id, source_name, run_id, "enqueued document");
        Ok(queue_id)
    }

    /// Atomically claim the oldest eligible item of `run_id` for this worker.
    ///
    /// Returns `None` when nothing is claimable; callers poll again later.
    pub async fn claim_next_document(&self, run_id: &str) -> QueueResult<Option<DocumentQueueItem>> {
        let now = now_millis();
        let stale_before = now - self.options.claim_timeout.as_millis() as i64;

        let mut tx = self.pool.begin().await?;

        // The write comes first so the transaction takes the write lock up
        // front instead of upgrading from a read snapshot.
        let row = sqlx::query(&format!(
            r#"
            UPDATE document_queue
            SET status = 'processing', claimed_by = ?1, claimed_at = ?2, updated_at = ?2
            WHERE queue_id = (
                SELECT queue_id FROM document_queue
                WHERE run_id = ?3
                  AND (status IN ('pending', 'retry')
                       OR (status = 'processing' AND claimed_at < ?4))
                ORDER BY created_at, queue_id
                LIMIT 1
            )
            RETURNING {}
            "#,
            ITEM_COLUMNS
        ))
        .bind(&self.worker_id)
        .bind(now)
        .bind(run_id)
        .bind(stale_before)
        .fetch_optional(&mut *tx)
        .await?;

        let item = match row {
            Some(row) => item_from_row(&row)?,
            None => {
                tx.commit().await?;
                return Ok(None);
            }
        };

        sqlx::query(
            r#"
            INSERT INTO run_workers (worker_id, run_id, start_time, last_heartbeat, current_document)
            VALUES (?1, ?2, ?3, ?3, ?4)
            ON CONFLICT(worker_id, run_id) DO UPDATE SET
                last_heartbeat = excluded.last_heartbeat,
                current_document = excluded.current_document
            "#,
        )
        .bind(&self.worker_id)
        .bind(run_id)
        .bind(now)
        .bind(&item.doc_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            queue_id = item.queue_id,
            doc_id = %item.doc_id,
            worker_id = %self.worker_id,
            retry_count = item.retry_count,
            "claimed document"
        );
        Ok(Some(item))
    }

    /// Mark an item this worker holds `completed`.
    ///
    /// Returns `false` (and changes nothing) if the item is missing, not in
    /// `processing` (including already completed), or claimed by another worker.
    pub async fn mark_completed(&self, queue_id: i64, content_hash: Option<&str>) -> QueueResult<bool> {
        self.complete(queue_id, content_hash, None).await
    }

    /// [`mark_completed`](Self::mark_completed), also merging the parser's
    /// counters into the item's metadata.
    pub async fn mark_completed_with_stats(
        &self,
        queue_id: i64,
        content_hash: Option<&str>,
        stats: &ProcessingStats,
    ) -> QueueResult<bool> {
        self.complete(queue_id, content_hash, Some(stats)).await
    }

    async fn complete(
        &self,
        queue_id: i64,
        content_hash: Option<&str>,
        stats: Option<&ProcessingStats>,
    ) -> QueueResult<bool> {
        let now = now_millis();
        let patch = match stats {
            Some(stats) => serde_json::to_string(&stats.to_metadata())?,
            None => "{}".to_string(),
        };

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE document_queue
            SET status = 'completed',
                completed_at = ?1,
                updated_at = ?1,
                content_hash = COALESCE(?2, content_hash),
                metadata = json_patch(metadata, ?3)
            WHERE queue_id = ?4 AND status = 'processing' AND claimed_by = ?5
            RETURNING doc_id, run_id, claimed_by, claimed_at
            "#,
        )
        .bind(now)
        .bind(content_hash)
        .bind(&patch)
        .bind(queue_id)
        .bind(&self.worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            self.log_ignored_report(queue_id, QueueStatus::Completed).await?;
            return Ok(false);
        };

        let report = Report::from_row(&row, now)?;
        report.record(&mut *tx, 1, 0).await?;
        tx.commit().await?;

        debug!(queue_id, doc_id = %report.doc_id, "document completed");
        Ok(true)
    }

    /// Record a failure for an item this worker holds.
    ///
    /// While `retry_count < max_retries` the item goes to `retry` with
    /// `retry_count` incremented and is immediately claimable again;
    /// after that it goes to `failed`, which nothing retries automatically.
    /// Returns `false` if the item is missing, not in `processing`, or
    /// claimed by another worker.
    pub async fn mark_failed(&self, queue_id: i64, error_message: &str) -> QueueResult<bool> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        // Every SET expression sees the pre-update row, so both CASEs
        // agree on which branch applies.
        let row = sqlx::query(
            r#"
            UPDATE document_queue
            SET status = CASE WHEN retry_count < max_retries THEN 'retry' ELSE 'failed' END,
                retry_count = CASE WHEN retry_count < max_retries
                                   THEN retry_count + 1 ELSE retry_count END,
                error_message = ?1,
                updated_at = ?2
            WHERE queue_id = ?3 AND status = 'processing' AND claimed_by = ?4
            RETURNING doc_id, run_id, claimed_by, claimed_at, status, retry_count, max_retries
            "#,
        )
        .bind(error_message)
        .bind(now)
        .bind(queue_id)
        .bind(&self.worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            self.log_ignored_report(queue_id, QueueStatus::Failed).await?;
            return Ok(false);
        };

        let report = Report::from_row(&row, now)?;
        let status: String = row.try_get("status")?;
        let status = status.parse::<QueueStatus>()?;
        let retry_count: i64 = row.try_get("retry_count")?;
        let max_retries: i64 = row.try_get("max_retries")?;

        report.record(&mut *tx, 0, 1).await?;
        tx.commit().await?;

        if status == QueueStatus::Retry {
            debug!(
                queue_id,
                doc_id = %report.doc_id,
                retry_count,
                max_retries,
                error = error_message,
                "document failed, will retry"
            );
        } else {
            warn!(
                queue_id,
                doc_id = %report.doc_id,
                retry_count,
                error = error_message,
                "document failed permanently"
            );
        }
        Ok(true)
    }

    /// Quarantine an item this worker holds after a failure that no retry
    /// can fix. Counts as a failure for the worker.
    ///
    /// Unlike [`DeadLetterQueue::move_to_dead_letter`](crate::dead_letter::DeadLetterQueue::move_to_dead_letter),
    /// which operators use on items in any state, this returns `false` if
    /// the item is not in `processing` or is claimed by another worker.
    pub async fn mark_dead_letter(
        &self,
        queue_id: i64,
        error_message: &str,
        error_details: Option<&ErrorDetails>,
    ) -> QueueResult<bool> {
        let now = now_millis();
        let details = error_details.map(serde_json::to_string).transpose()?;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE document_queue
            SET status = 'dead_letter',
                error_message = ?1,
                error_details = ?2,
                updated_at = ?3
            WHERE queue_id = ?4 AND status = 'processing' AND claimed_by = ?5
            RETURNING doc_id, run_id, claimed_by, claimed_at
            "#,
        )
        .bind(error_message)
        .bind(&details)
        .bind(now)
        .bind(queue_id)
        .bind(&self.worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            self.log_ignored_report(queue_id, QueueStatus::DeadLetter).await?;
            return Ok(false);
        };

        let report = Report::from_row(&row, now)?;
        report.record(&mut *tx, 0, 1).await?;
        tx.commit().await?;

        info!(queue_id, doc_id = %report.doc_id, error = error_message, "moved to dead letter queue");
        Ok(true)
    }

    /// Enqueue a document discovered while processing `parent_doc_id` and
    /// record the discovery edge, in one transaction.
    ///
    /// Returns `false` without enqueueing anything for a self-link.
    pub async fn add_linked_document(
        &self,
        parent_doc_id: &str,
        child_doc_id: &str,
        source_name: &str,
        run_id: &str,
        link_depth: i64,
    ) -> QueueResult<bool> {
        if parent_doc_id == child_doc_id {
            debug!(doc_id = parent_doc_id, "ignoring self-link");
            return Ok(false);
        }

        let now = now_millis();
        let metadata = serde_json::json!({ "link_depth": link_depth }).to_string();

        let mut tx = self.pool.begin().await?;

        let queue_id = sqlx::query(
            r#"
            INSERT INTO document_queue (doc_id, source_name, run_id, status, retry_count,
                                        max_retries, metadata, parent_doc_id, created_at, updated_at)
            VALUES (?, ?, ?, 'pending', 0, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(child_doc_id)
        .bind(source_name)
        .bind(run_id)
        .bind(self.options.max_retries)
        .bind(&metadata)
        .bind(parent_doc_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO document_dependencies (run_id, parent_doc_id, child_doc_id, link_depth, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(parent_doc_id)
        .bind(child_doc_id)
        .bind(link_depth)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(queue_id, parent_doc_id, child_doc_id, link_depth, "enqueued linked document");
        Ok(true)
    }

    /// Point-in-time item counts per status for `run_id`.
    pub async fn get_queue_status(&self, run_id: &str) -> QueueResult<QueueStatusCounts> {
        count_by_status(&self.pool, Some(run_id)).await
    }

    pub async fn get_item(&self, queue_id: i64) -> QueueResult<Option<DocumentQueueItem>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM document_queue WHERE queue_id = ?",
            ITEM_COLUMNS
        ))
        .bind(queue_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    /// Discovery edges recorded for `parent_doc_id`, oldest first.
    pub async fn get_children(
        &self,
        run_id: &str,
        parent_doc_id: &str,
    ) -> QueueResult<Vec<DocumentDependency>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, parent_doc_id, child_doc_id, link_depth, created_at
            FROM document_dependencies
            WHERE run_id = ? AND parent_doc_id = ?
            ORDER BY id
            "#,
        )
        .bind(run_id)
        .bind(parent_doc_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(dependency_from_row).collect()
    }

    async fn log_ignored_report(&self, queue_id: i64, attempted: QueueStatus) -> QueueResult<()> {
        let current: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT status, claimed_by FROM document_queue WHERE queue_id = ?")
                .bind(queue_id)
                .fetch_optional(&self.pool)
                .await?;

        match current {
            None => warn!(queue_id, attempted = %attempted, "report for unknown queue item"),
            Some((status, claimed_by))
                if status == QueueStatus::Processing.as_str()
                    && claimed_by.as_deref() != Some(self.worker_id.as_str()) =>
            {
                warn!(
                    queue_id,
                    worker_id = %self.worker_id,
                    claimed_by = claimed_by.as_deref().unwrap_or(""),
                    attempted = %attempted,
                    "report ignored, claim is held by another worker"
                )
            }
            Some((status, _)) if status == attempted.as_str() => {
                info!(queue_id, status = %status, "duplicate report ignored")
            }
            Some((status, _)) => warn!(
                queue_id,
                status = %status,
                attempted = %attempted,
                "report ignored, item is not processing"
            ),
        }
        Ok(())
    }
}

/// The claim being reported on, as returned by a report update.
struct Report {
    doc_id: String,
    run_id: String,
    claimed_by: Option<String>,
    elapsed_secs: f64,
    now: i64,
}

impl Report {
    fn from_row(row: &sqlx::sqlite::SqliteRow, now: i64) -> QueueResult<Self> {
        let claimed_at: Option<i64> = row.try_get("claimed_at")?;
        Ok(Self {
            doc_id: row.try_get("doc_id")?,
            run_id: row.try_get("run_id")?,
            claimed_by: row.try_get("claimed_by")?,
            elapsed_secs: claimed_at
                .map(|at| (now - at).max(0) as f64 / 1000.0)
                .unwrap_or(0.0),
            now,
        })
    }

    /// Credit the worker holding the claim; creates its row if it never registered.
    async fn record(&self, conn: &mut SqliteConnection, processed: i64, failed: i64) -> QueueResult<()> {
        let Some(worker_id) = self.claimed_by.as_deref() else {
            return Ok(());
        };

        sqlx::query(
            r#"
            INSERT INTO run_workers (worker_id, run_id, start_time, last_heartbeat,
                                     documents_processed, documents_failed, total_processing_time)
            VALUES (?1, ?2, ?3, ?3, ?4, ?5, ?6)
            ON CONFLICT(worker_id, run_id) DO UPDATE SET
                last_heartbeat = excluded.last_heartbeat,
                documents_processed = run_workers.documents_processed + excluded.documents_processed,
                documents_failed = run_workers.documents_failed + excluded.documents_failed,
                total_processing_time = run_workers.total_processing_time
                                        + excluded.total_processing_time,
                current_document = CASE WHEN run_workers.current_document = ?7
                                        THEN NULL ELSE run_workers.current_document END
            "#,
        )
        .bind(worker_id)
        .bind(&self.run_id)
        .bind(self.now)
        .bind(processed)
        .bind(failed)
        .bind(self.elapsed_secs)
        .bind(&self.doc_id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}
