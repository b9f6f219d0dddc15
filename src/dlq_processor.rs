//! Read-only triage over the dead-letter queue.
//!
//! Classification and grouping are pure and live in
//! [`docqueue_core::failure`]; this module only fetches the rows.

use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::{Row, SqlitePool};

use docqueue_core::failure::{group_failures, FailurePattern, FailureRecord};
use docqueue_core::models::ErrorDetails;

use crate::error::QueueResult;

/// Headline numbers for one run's dead-letter queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeadLetterSummary {
    pub run_id: String,
    pub total: i64,
    /// Dead-lettered item count per content source.
    pub by_source: BTreeMap<String, i64>,
    /// Earliest and latest quarantine times (epoch ms); `None` when empty.
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
}

#[derive(Clone)]
pub struct DeadLetterProcessor {
    pool: SqlitePool,
}

impl DeadLetterProcessor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Group a run's dead-lettered items by error type, most frequent first.
    pub async fn analyze_failure_patterns(&self, run_id: &str) -> QueueResult<Vec<FailurePattern>> {
        let rows = sqlx::query(
            r#"
            SELECT queue_id, source_name, error_message, error_details
            FROM document_queue
            WHERE run_id = ? AND status = 'dead_letter'
            ORDER BY updated_at DESC, queue_id DESC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let details: Option<String> = row.try_get("error_details")?;
            records.push(FailureRecord {
                queue_id: row.try_get("queue_id")?,
                source_name: row.try_get("source_name")?,
                error_message: row.try_get("error_message")?,
                error_details: details
                    .as_deref()
                    .map(serde_json::from_str::<ErrorDetails>)
                    .transpose()?,
            });
        }

        Ok(group_failures(&records))
    }

    pub async fn get_dead_letter_summary(&self, run_id: &str) -> QueueResult<DeadLetterSummary> {
        let rows = sqlx::query(
            r#"
            SELECT source_name, COUNT(*) AS n, MIN(updated_at) AS oldest, MAX(updated_at) AS newest
            FROM document_queue
            WHERE run_id = ? AND status = 'dead_letter'
            GROUP BY source_name
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = DeadLetterSummary {
            run_id: run_id.to_string(),
            ..DeadLetterSummary::default()
        };

        for row in &rows {
            let source: String = row.try_get("source_name")?;
            let count: i64 = row.try_get("n")?;
            let oldest: i64 = row.try_get("oldest")?;
            let newest: i64 = row.try_get("newest")?;

            summary.total += count;
            summary.by_source.insert(source, count);
            summary.oldest = Some(summary.oldest.map_or(oldest, |o| o.min(oldest)));
            summary.newest = Some(summary.newest.map_or(newest, |n| n.max(newest)));
        }

        Ok(summary)
    }
}
