//! Run identity, run lifecycle, and worker registration.
//!
//! A run is identified by a digest of its run-affecting configuration
//! (see [`docqueue_core::run_id`]), so every process that loads the same
//! pipeline configuration computes the same run id without talking to
//! anyone. [`RunCoordinator::ensure_run_exists`] then makes the row exist
//! exactly once no matter how many processes race to create it.
//!
//! Workers announce themselves with [`RunCoordinator::register_worker`],
//! which doubles as the heartbeat: call it on startup and on every tick.

use std::time::Duration;

use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, info};

use docqueue_core::models::{now_millis, ProcessingRun, RunStatus, RunWorker, WorkerInfo};
use docqueue_core::run_id::run_id_from_config;

use crate::error::QueueResult;
use crate::rows::{run_from_row, worker_from_row, RUN_COLUMNS, WORKER_COLUMNS};

#[derive(Clone)]
pub struct RunCoordinator {
    pool: SqlitePool,
}

impl RunCoordinator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stable 16-hex-character id for a pipeline configuration.
    ///
    /// Pure: no I/O, and `config` is only read.
    pub fn get_run_id_from_config(config: &Value) -> String {
        run_id_from_config(config)
    }

    /// Insert the run as `active` if it does not exist yet, and return it.
    ///
    /// An existing run is returned unchanged; in particular its
    /// `config_snapshot` is never overwritten.
    pub async fn ensure_run_exists(&self, run_id: &str, config: &Value) -> QueueResult<ProcessingRun> {
        let now = now_millis();
        let snapshot = serde_json::to_string(config)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO processing_runs (run_id, status, created_at, updated_at, config_snapshot)
            VALUES (?, 'active', ?, ?, ?)
            ON CONFLICT(run_id) DO NOTHING
            "#,
        )
        .bind(run_id)
        .bind(now)
        .bind(now)
        .bind(&snapshot)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            info!(run_id, "created processing run");
        }

        let row = sqlx::query(&format!(
            "SELECT {} FROM processing_runs WHERE run_id = ?",
            RUN_COLUMNS
        ))
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;

        run_from_row(&row)
    }

    /// Register `worker_id` against `run_id`, or refresh its heartbeat.
    ///
    /// `start_time` is set on the first call only; `last_heartbeat` on
    /// every call. A hostname already on record is kept when `info`
    /// doesn't carry one.
    pub async fn register_worker(
        &self,
        run_id: &str,
        worker_id: &str,
        info: &WorkerInfo,
    ) -> QueueResult<()> {
        let now = now_millis();
        sqlx::query(
            r#"
            INSERT INTO run_workers (worker_id, run_id, hostname, start_time, last_heartbeat)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(worker_id, run_id) DO UPDATE SET
                last_heartbeat = excluded.last_heartbeat,
                hostname = COALESCE(excluded.hostname, run_workers.hostname)
            "#,
        )
        .bind(worker_id)
        .bind(run_id)
        .bind(&info.hostname)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(run_id, worker_id, "worker heartbeat");
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> QueueResult<Option<ProcessingRun>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM processing_runs WHERE run_id = ?",
            RUN_COLUMNS
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(run_from_row).transpose()
    }

    /// Most recently created runs first.
    pub async fn list_runs(&self, limit: i64) -> QueueResult<Vec<ProcessingRun>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM processing_runs ORDER BY created_at DESC, run_id LIMIT ?",
            RUN_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(run_from_row).collect()
    }

    /// Move a run to `status`. Returns `false` if the run does not exist.
    pub async fn update_run_status(&self, run_id: &str, status: RunStatus) -> QueueResult<bool> {
        let updated = sqlx::query(
            "UPDATE processing_runs SET status = ?, updated_at = ? WHERE run_id = ?",
        )
        .bind(status.as_str())
        .bind(now_millis())
        .bind(run_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated > 0 {
            info!(run_id, status = %status, "run status changed");
        }
        Ok(updated > 0)
    }

    /// Recompute the run's cumulative counters from its queue rows.
    ///
    /// `updated_at` only moves while the run is active, so a finished run
    /// keeps the duration its throughput is computed from.
    pub async fn refresh_run_progress(&self, run_id: &str) -> QueueResult<Option<ProcessingRun>> {
        sqlx::query(
            r#"
            UPDATE processing_runs SET
                documents_queued = (SELECT COUNT(*) FROM document_queue WHERE run_id = ?1),
                documents_processed = (SELECT COUNT(*) FROM document_queue
                                       WHERE run_id = ?1 AND status = 'completed'),
                documents_failed = (SELECT COUNT(*) FROM document_queue
                                    WHERE run_id = ?1 AND status IN ('failed', 'dead_letter')),
                updated_at = CASE WHEN status = 'active' THEN ?2 ELSE updated_at END
            WHERE run_id = ?1
            "#,
        )
        .bind(run_id)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        self.get_run(run_id).await
    }

    pub async fn list_workers(&self, run_id: &str) -> QueueResult<Vec<RunWorker>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM run_workers WHERE run_id = ? ORDER BY start_time, worker_id",
            WORKER_COLUMNS
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(worker_from_row).collect()
    }

    /// Workers whose last heartbeat is within `window` of now.
    pub async fn active_workers(&self, run_id: &str, window: Duration) -> QueueResult<Vec<RunWorker>> {
        let cutoff = now_millis() - window.as_millis() as i64;
        let rows = sqlx::query(&format!(
            "SELECT {} FROM run_workers WHERE run_id = ? AND last_heartbeat >= ? \
             ORDER BY start_time, worker_id",
            WORKER_COLUMNS
        ))
        .bind(run_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(worker_from_row).collect()
    }
}
