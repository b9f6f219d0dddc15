//! Read-only aggregation over the queue tables.
//!
//! Every query here is a plain `SELECT`; nothing in this module takes the
//! write lock, so metrics can be polled as often as a dashboard likes
//! without slowing down claims.
//!
//! Each metric comes in two flavours:
//!
//! | Method | On store error |
//! |--------|----------------|
//! | `try_get_*` | returns the [`QueueError`](crate::error::QueueError) |
//! | `get_*` | logs a warning and returns an empty or zeroed value |
//!
//! Monitoring must never stop ingestion, so dashboards and the CLI use the
//! `get_*` forms. [`crate::alerts::AlertManager`] uses `try_get_*` so it can
//! turn the failure into an alert of its own.

use std::time::Duration;

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use docqueue_core::health::QueueHealth;
use docqueue_core::models::{format_millis, now_millis, DocumentQueueItem, RunStatus};

use crate::config::Config;
use crate::error::QueueResult;
use crate::rows::{count_by_status, item_from_row, run_from_row, ITEM_COLUMNS, RUN_COLUMNS};

const HOUR_MS: i64 = 3_600_000;

/// One worker's contribution to a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerMetrics {
    pub worker_id: String,
    pub hostname: Option<String>,
    pub documents_processed: i64,
    pub documents_failed: i64,
    pub elements_created: i64,
    pub relationships_created: i64,
    pub links_discovered: i64,
    /// Mean seconds from claim to completion over this worker's completed items.
    pub avg_processing_time: f64,
    pub current_document: Option<String>,
    pub last_heartbeat: i64,
}

/// Run-wide totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetrics {
    pub run_id: String,
    pub status: RunStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub documents_queued: i64,
    pub documents_processed: i64,
    pub documents_failed: i64,
    pub documents_in_dead_letter: i64,
    pub active_workers: i64,
    pub peak_workers: i64,
    pub total_elements: i64,
    /// Completed documents per second over the run's lifetime; 0 until
    /// the run is `completed`.
    pub throughput_docs_per_second: f64,
}

/// Activity during one clock hour.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HourlyMetrics {
    /// Start of the hour, epoch ms.
    pub hour_start: i64,
    /// The same instant as RFC 3339, for display.
    pub hour: String,
    pub queued: i64,
    pub completed: i64,
    pub failed: i64,
    pub avg_processing_time: f64,
}

#[derive(Clone)]
pub struct MetricsCollector {
    pool: SqlitePool,
    claim_timeout: Duration,
    heartbeat_window: Duration,
}

impl MetricsCollector {
    /// Collector with the default claim timeout (300s) and heartbeat window (60s).
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            claim_timeout: Duration::from_secs(300),
            heartbeat_window: Duration::from_secs(60),
        }
    }

    pub fn from_config(pool: SqlitePool, config: &Config) -> Self {
        Self::new(pool)
            .with_claim_timeout(config.queue.claim_timeout())
            .with_heartbeat_window(config.monitoring.heartbeat_window())
    }

    /// Claims older than this count as stale. Should match the queue's own timeout.
    pub fn with_claim_timeout(mut self, claim_timeout: Duration) -> Self {
        self.claim_timeout = claim_timeout;
        self
    }

    /// Workers heard from within this window count as live.
    pub fn with_heartbeat_window(mut self, window: Duration) -> Self {
        self.heartbeat_window = window;
        self
    }

    pub fn claim_timeout(&self) -> Duration {
        self.claim_timeout
    }

    pub async fn get_worker_metrics(&self, run_id: &str) -> Vec<WorkerMetrics> {
        self.try_get_worker_metrics(run_id)
            .await
            .unwrap_or_else(|e| degraded("worker metrics", e))
    }

    pub async fn try_get_worker_metrics(&self, run_id: &str) -> QueueResult<Vec<WorkerMetrics>> {
        // Parser counters live in each completed item's metadata and are
        // only decoded here, inside SQLite.
        let rows = sqlx::query(
            r#"
            SELECT w.worker_id, w.hostname, w.documents_processed, w.documents_failed,
                   w.current_document, w.last_heartbeat,
                   CAST(COALESCE(s.elements, 0) AS INTEGER) AS elements_created,
                   CAST(COALESCE(s.relationships, 0) AS INTEGER) AS relationships_created,
                   CAST(COALESCE(s.links, 0) AS INTEGER) AS links_discovered,
                   CAST(COALESCE(s.avg_ms, 0.0) / 1000.0 AS REAL) AS avg_processing_time
            FROM run_workers w
            LEFT JOIN (
                SELECT claimed_by,
                       SUM(COALESCE(json_extract(metadata, '$.elements_created'), 0)) AS elements,
                       SUM(COALESCE(json_extract(metadata, '$.relationships_created'), 0)) AS relationships,
                       SUM(COALESCE(json_extract(metadata, '$.links_discovered'), 0)) AS links,
                       AVG(completed_at - claimed_at) AS avg_ms
                FROM document_queue
                WHERE run_id = ?1 AND status = 'completed' AND claimed_by IS NOT NULL
                GROUP BY claimed_by
            ) s ON s.claimed_by = w.worker_id
            WHERE w.run_id = ?1
            ORDER BY w.start_time, w.worker_id
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let mut metrics = Vec::with_capacity(rows.len());
        for row in &rows {
            metrics.push(WorkerMetrics {
                worker_id: row.try_get("worker_id")?,
                hostname: row.try_get("hostname")?,
                documents_processed: row.try_get("documents_processed")?,
                documents_failed: row.try_get("documents_failed")?,
                elements_created: row.try_get("elements_created")?,
                relationships_created: row.try_get("relationships_created")?,
                links_discovered: row.try_get("links_discovered")?,
                avg_processing_time: row.try_get("avg_processing_time")?,
                current_document: row.try_get("current_document")?,
                last_heartbeat: row.try_get("last_heartbeat")?,
            });
        }
        Ok(metrics)
    }

    /// `None` when the run does not exist or the store could not be read.
    pub async fn get_run_metrics(&self, run_id: &str) -> Option<RunMetrics> {
        self.try_get_run_metrics(run_id)
            .await
            .unwrap_or_else(|e| degraded("run metrics", e))
    }

    pub async fn try_get_run_metrics(&self, run_id: &str) -> QueueResult<Option<RunMetrics>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM processing_runs WHERE run_id = ?",
            RUN_COLUMNS
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let run = run_from_row(&row)?;
        let counts = count_by_status(&self.pool, Some(run_id)).await?;

        let total_elements: i64 = sqlx::query_scalar(
            r#"
            SELECT CAST(COALESCE(SUM(COALESCE(json_extract(metadata, '$.elements_created'), 0)), 0)
                        AS INTEGER)
            FROM document_queue
            WHERE run_id = ? AND status = 'completed'
            "#,
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;

        let peak_workers: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM run_workers WHERE run_id = ?")
                .bind(run_id)
                .fetch_one(&self.pool)
                .await?;

        let active_workers = self.count_live_workers(Some(run_id)).await?;

        let elapsed_secs = (run.updated_at - run.created_at) as f64 / 1000.0;
        let throughput_docs_per_second = if run.status == RunStatus::Completed && elapsed_secs > 0.0 {
            counts.completed as f64 / elapsed_secs
        } else {
            0.0
        };

        Ok(Some(RunMetrics {
            run_id: run.run_id,
            status: run.status,
            created_at: run.created_at,
            updated_at: run.updated_at,
            documents_queued: counts.total,
            documents_processed: counts.completed,
            documents_failed: counts.failed,
            documents_in_dead_letter: counts.dead_letter,
            active_workers,
            peak_workers,
            total_elements,
            throughput_docs_per_second,
        }))
    }

    /// Health across every run.
    pub async fn get_queue_health_metrics(&self) -> QueueHealth {
        self.try_get_queue_health_metrics()
            .await
            .unwrap_or_else(|e| degraded("queue health", e))
    }

    pub async fn try_get_queue_health_metrics(&self) -> QueueResult<QueueHealth> {
        self.health(None).await
    }

    pub async fn get_queue_health(&self, run_id: &str) -> QueueHealth {
        self.try_get_queue_health(run_id).await.unwrap_or_else(|e| {
            let mut health: QueueHealth = degraded("queue health", e);
            health.run_id = Some(run_id.to_string());
            health
        })
    }

    pub async fn try_get_queue_health(&self, run_id: &str) -> QueueResult<QueueHealth> {
        self.health(Some(run_id)).await
    }

    async fn health(&self, run_id: Option<&str>) -> QueueResult<QueueHealth> {
        let now = now_millis();
        let counts = count_by_status(&self.pool, run_id).await?;

        let oldest_pending: Option<i64> = sqlx::query_scalar(
            "SELECT MIN(created_at) FROM document_queue \
             WHERE status = 'pending' AND (?1 IS NULL OR run_id = ?1)",
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;

        let avg_ms: Option<f64> = sqlx::query_scalar(
            "SELECT CAST(AVG(completed_at - claimed_at) AS REAL) FROM document_queue \
             WHERE status = 'completed' AND claimed_at IS NOT NULL AND completed_at IS NOT NULL \
             AND (?1 IS NULL OR run_id = ?1)",
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;

        let stale = self.count_stale(run_id, self.claim_timeout).await?;
        let workers = self.count_live_workers(run_id).await?;

        Ok(QueueHealth::from_parts(
            run_id.map(str::to_string),
            &counts,
            oldest_pending
                .map(|at| (now - at).max(0) as f64 / 1000.0)
                .unwrap_or(0.0),
            avg_ms.unwrap_or(0.0) / 1000.0,
            stale,
            workers,
        ))
    }

    /// One bucket per clock hour for the trailing `hours` hours (including
    /// the current one), oldest first. Hours without activity are zero.
    pub async fn get_historical_metrics(&self, hours: u32) -> Vec<HourlyMetrics> {
        self.try_get_historical_metrics(hours)
            .await
            .unwrap_or_else(|e| degraded("historical metrics", e))
    }

    pub async fn try_get_historical_metrics(&self, hours: u32) -> QueueResult<Vec<HourlyMetrics>> {
        if hours == 0 {
            return Ok(Vec::new());
        }

        let current_hour = now_millis().div_euclid(HOUR_MS);
        let first_hour = current_hour - i64::from(hours) + 1;
        let since = first_hour * HOUR_MS;

        let mut buckets: Vec<HourlyMetrics> = (first_hour..=current_hour)
            .map(|h| HourlyMetrics {
                hour_start: h * HOUR_MS,
                hour: format_millis(h * HOUR_MS),
                ..HourlyMetrics::default()
            })
            .collect();

        let queued = sqlx::query(
            "SELECT created_at / 3600000 AS hour, COUNT(*) AS n FROM document_queue \
             WHERE created_at >= ? GROUP BY hour",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        for row in &queued {
            if let Some(b) = bucket(&mut buckets, first_hour, row.try_get("hour")?) {
                b.queued = row.try_get("n")?;
            }
        }

        let completed = sqlx::query(
            "SELECT completed_at / 3600000 AS hour, COUNT(*) AS n, \
                    CAST(COALESCE(AVG(completed_at - claimed_at), 0.0) / 1000.0 AS REAL) AS avg_secs \
             FROM document_queue \
             WHERE status = 'completed' AND completed_at >= ? GROUP BY hour",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        for row in &completed {
            if let Some(b) = bucket(&mut buckets, first_hour, row.try_get("hour")?) {
                b.completed = row.try_get("n")?;
                b.avg_processing_time = row.try_get("avg_secs")?;
            }
        }

        let failed = sqlx::query(
            "SELECT updated_at / 3600000 AS hour, COUNT(*) AS n FROM document_queue \
             WHERE status IN ('failed', 'dead_letter') AND updated_at >= ? GROUP BY hour",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        for row in &failed {
            if let Some(b) = bucket(&mut buckets, first_hour, row.try_get("hour")?) {
                b.failed = row.try_get("n")?;
            }
        }

        Ok(buckets)
    }

    /// `processing` items claimed longer than `older_than` ago, oldest claim first.
    pub async fn get_stale_work_items(
        &self,
        run_id: Option<&str>,
        older_than: Duration,
    ) -> Vec<DocumentQueueItem> {
        self.try_get_stale_work_items(run_id, older_than)
            .await
            .unwrap_or_else(|e| degraded("stale work items", e))
    }

    pub async fn try_get_stale_work_items(
        &self,
        run_id: Option<&str>,
        older_than: Duration,
    ) -> QueueResult<Vec<DocumentQueueItem>> {
        let cutoff = now_millis() - older_than.as_millis() as i64;
        let rows = sqlx::query(&format!(
            "SELECT {} FROM document_queue \
             WHERE status = 'processing' AND claimed_at < ?1 AND (?2 IS NULL OR run_id = ?2) \
             ORDER BY claimed_at, queue_id",
            ITEM_COLUMNS
        ))
        .bind(cutoff)
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    pub(crate) async fn count_stale(&self, run_id: Option<&str>, older_than: Duration) -> QueueResult<i64> {
        let cutoff = now_millis() - older_than.as_millis() as i64;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM document_queue \
             WHERE status = 'processing' AND claimed_at < ?1 AND (?2 IS NULL OR run_id = ?2)",
        )
        .bind(cutoff)
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_live_workers(&self, run_id: Option<&str>) -> QueueResult<i64> {
        let cutoff = now_millis() - self.heartbeat_window.as_millis() as i64;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT worker_id) FROM run_workers \
             WHERE last_heartbeat >= ?1 AND (?2 IS NULL OR run_id = ?2)",
        )
        .bind(cutoff)
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

fn bucket(buckets: &mut [HourlyMetrics], first_hour: i64, hour: i64) -> Option<&mut HourlyMetrics> {
    usize::try_from(hour - first_hour)
        .ok()
        .and_then(move |i| buckets.get_mut(i))
}

fn degraded<T: Default>(what: &str, error: crate::error::QueueError) -> T {
    warn!(error = %error, "{} unavailable, returning empty result", what);
    T::default()
}
