//! Row decoding shared by the SQLite-backed components.
//!
//! Structured columns (`metadata`, `error_details`, `config_snapshot`) are
//! stored as JSON text and decoded here, once, at the boundary.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docqueue_core::models::{
    DocumentDependency, DocumentQueueItem, ErrorDetails, ProcessingRun, QueueStatus,
    QueueStatusCounts, RunStatus, RunWorker,
};

use crate::error::QueueResult;

/// Column list matching [`item_from_row`].
pub(crate) const ITEM_COLUMNS: &str = "queue_id, doc_id, source_name, run_id, status, \
    claimed_by, claimed_at, completed_at, retry_count, max_retries, error_message, \
    error_details, content_hash, metadata, parent_doc_id, created_at, updated_at";

pub(crate) const RUN_COLUMNS: &str = "run_id, status, created_at, updated_at, config_snapshot, \
    documents_queued, documents_processed, documents_failed";

pub(crate) const WORKER_COLUMNS: &str = "worker_id, run_id, hostname, start_time, \
    last_heartbeat, documents_processed, documents_failed, current_document, \
    total_processing_time";

pub(crate) fn item_from_row(row: &SqliteRow) -> QueueResult<DocumentQueueItem> {
    let status: String = row.try_get("status")?;
    let metadata: String = row.try_get("metadata")?;
    let error_details: Option<String> = row.try_get("error_details")?;

    Ok(DocumentQueueItem {
        queue_id: row.try_get("queue_id")?,
        doc_id: row.try_get("doc_id")?,
        source_name: row.try_get("source_name")?,
        run_id: row.try_get("run_id")?,
        status: status.parse::<QueueStatus>()?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: row.try_get("claimed_at")?,
        completed_at: row.try_get("completed_at")?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        error_message: row.try_get("error_message")?,
        error_details: error_details
            .as_deref()
            .map(serde_json::from_str::<ErrorDetails>)
            .transpose()?,
        content_hash: row.try_get("content_hash")?,
        metadata: serde_json::from_str(&metadata)?,
        parent_doc_id: row.try_get("parent_doc_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn run_from_row(row: &SqliteRow) -> QueueResult<ProcessingRun> {
    let status: String = row.try_get("status")?;
    let snapshot: String = row.try_get("config_snapshot")?;

    Ok(ProcessingRun {
        run_id: row.try_get("run_id")?,
        status: status.parse::<RunStatus>()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        config_snapshot: serde_json::from_str(&snapshot)?,
        documents_queued: row.try_get("documents_queued")?,
        documents_processed: row.try_get("documents_processed")?,
        documents_failed: row.try_get("documents_failed")?,
    })
}

pub(crate) fn worker_from_row(row: &SqliteRow) -> QueueResult<RunWorker> {
    Ok(RunWorker {
        worker_id: row.try_get("worker_id")?,
        run_id: row.try_get("run_id")?,
        hostname: row.try_get("hostname")?,
        start_time: row.try_get("start_time")?,
        last_heartbeat: row.try_get("last_heartbeat")?,
        documents_processed: row.try_get("documents_processed")?,
        documents_failed: row.try_get("documents_failed")?,
        current_document: row.try_get("current_document")?,
        total_processing_time: row.try_get("total_processing_time")?,
    })
}

pub(crate) fn dependency_from_row(row: &SqliteRow) -> QueueResult<DocumentDependency> {
    Ok(DocumentDependency {
        run_id: row.try_get("run_id")?,
        parent_doc_id: row.try_get("parent_doc_id")?,
        child_doc_id: row.try_get("child_doc_id")?,
        link_depth: row.try_get("link_depth")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Item counts per status, for one run or (with `None`) across all runs.
pub(crate) async fn count_by_status(
    pool: &SqlitePool,
    run_id: Option<&str>,
) -> QueueResult<QueueStatusCounts> {
    let rows = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM document_queue \
         WHERE (?1 IS NULL OR run_id = ?1) GROUP BY status",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    let mut counts = QueueStatusCounts::default();
    for row in &rows {
        let status: String = row.try_get("status")?;
        let n: i64 = row.try_get("n")?;
        counts.add(status.parse::<QueueStatus>()?, n);
    }
    Ok(counts)
}
