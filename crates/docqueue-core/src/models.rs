//! Core data models for the document work queue.
//!
//! These types mirror the persisted rows (runs, queue items, workers,
//! dependency edges) and the structured blobs stored alongside them.
//! All of them serialize to plain JSON so the CLI and any dashboard can
//! render them without knowing about the store.
//!
//! Timestamps are Unix epoch milliseconds (`i64`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Returned when a status string read back from the store is not one we know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);

/// Lifecycle status of a [`DocumentQueueItem`].
///
/// ```text
/// pending ──claim──▶ processing ──complete──▶ completed
///                      │   ▲
///        fail (retries │   │ claim
///           remain)    ▼   │
///                      retry
///                      │
///        fail (retries exhausted) ──▶ failed
///
/// processing | retry | failed ──move_to_dead_letter──▶ dead_letter
/// dead_letter ──retry_from_dead_letter──▶ pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Retry,
    Completed,
    Failed,
    DeadLetter,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 6] = [
        QueueStatus::Pending,
        QueueStatus::Processing,
        QueueStatus::Retry,
        QueueStatus::Completed,
        QueueStatus::Failed,
        QueueStatus::DeadLetter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Retry => "retry",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::DeadLetter => "dead_letter",
        }
    }

    /// Terminal statuses are never picked up by a claim.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::DeadLetter
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Lifecycle status of a [`ProcessingRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Active,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Active => "active",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RunStatus::Active),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One logical execution of the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRun {
    pub run_id: String,
    pub status: RunStatus,
    pub created_at: i64,
    pub updated_at: i64,
    /// Configuration as it was when the run was first created.
    pub config_snapshot: Value,
    pub documents_queued: i64,
    pub documents_processed: i64,
    pub documents_failed: i64,
}

/// A single document waiting for, undergoing, or finished with processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentQueueItem {
    pub queue_id: i64,
    pub doc_id: String,
    pub source_name: String,
    pub run_id: String,
    pub status: QueueStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub retry_count: i64,
    pub max_retries: i64,
    pub error_message: Option<String>,
    /// Only populated for dead-lettered items.
    pub error_details: Option<ErrorDetails>,
    pub content_hash: Option<String>,
    /// Free-form object; parser counters live under the
    /// [`ProcessingStats`] keys.
    pub metadata: Value,
    /// Set when the item was discovered while processing another document.
    pub parent_doc_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl DocumentQueueItem {
    /// Parser counters recorded on completion, decoded on demand.
    pub fn stats(&self) -> ProcessingStats {
        ProcessingStats::from_metadata(&self.metadata)
    }
}

/// A worker process registered against a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunWorker {
    pub worker_id: String,
    pub run_id: String,
    pub hostname: Option<String>,
    pub start_time: i64,
    /// The only liveness signal; refreshed on registration and every claim/report.
    pub last_heartbeat: i64,
    pub documents_processed: i64,
    pub documents_failed: i64,
    pub current_document: Option<String>,
    /// Seconds spent between claim and report, summed over all items.
    pub total_processing_time: f64,
}

/// Edge recording that `parent_doc_id` discovered `child_doc_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDependency {
    pub run_id: String,
    pub parent_doc_id: String,
    pub child_doc_id: String,
    pub link_depth: i64,
    pub created_at: i64,
}

/// Extra metadata supplied by a worker when it registers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub hostname: Option<String>,
}

impl WorkerInfo {
    pub fn with_hostname(hostname: impl Into<String>) -> Self {
        Self {
            hostname: Some(hostname.into()),
        }
    }
}

/// Counters produced by the external parser for one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
    #[serde(default)]
    pub elements_created: i64,
    #[serde(default)]
    pub relationships_created: i64,
    #[serde(default)]
    pub links_discovered: i64,
}

impl ProcessingStats {
    /// Read the counters out of an item's metadata object, treating missing
    /// or non-numeric fields as zero.
    pub fn from_metadata(metadata: &Value) -> Self {
        let field = |key: &str| metadata.get(key).and_then(Value::as_i64).unwrap_or(0);
        Self {
            elements_created: field("elements_created"),
            relationships_created: field("relationships_created"),
            links_discovered: field("links_discovered"),
        }
    }

    /// JSON object suitable for merging into an item's metadata.
    pub fn to_metadata(&self) -> Value {
        serde_json::json!({
            "elements_created": self.elements_created,
            "relationships_created": self.relationships_created,
            "links_discovered": self.links_discovered,
        })
    }
}

/// Structured context attached to a dead-lettered item.
///
/// `error_type` and `stage` are the fields the failure analysis reads;
/// anything else a caller supplies is kept verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ErrorDetails {
    pub fn typed(error_type: impl Into<String>) -> Self {
        Self {
            error_type: Some(error_type.into()),
            ..Self::default()
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Point-in-time counts per status for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub retry: i64,
    pub dead_letter: i64,
    pub total: i64,
}

impl QueueStatusCounts {
    /// Add `count` rows of `status`, keeping `total` in step.
    pub fn add(&mut self, status: QueueStatus, count: i64) {
        match status {
            QueueStatus::Pending => self.pending += count,
            QueueStatus::Processing => self.processing += count,
            QueueStatus::Retry => self.retry += count,
            QueueStatus::Completed => self.completed += count,
            QueueStatus::Failed => self.failed += count,
            QueueStatus::DeadLetter => self.dead_letter += count,
        }
        self.total += count;
    }

    /// Items still waiting to be claimed.
    pub fn backlog(&self) -> i64 {
        self.pending + self.retry
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Format an epoch-millisecond timestamp as RFC 3339 (UTC).
pub fn format_millis(ts: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in QueueStatus::ALL {
            assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
        }
        assert_eq!(
            "archived".parse::<QueueStatus>(),
            Err(UnknownStatus("archived".to_string()))
        );
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&QueueStatus::DeadLetter).unwrap();
        assert_eq!(json, "\"dead_letter\"");
    }

    #[test]
    fn terminal_statuses() {
        assert!(QueueStatus::Completed.is_terminal());
        assert!(QueueStatus::DeadLetter.is_terminal());
        assert!(!QueueStatus::Retry.is_terminal());
        assert!(!QueueStatus::Processing.is_terminal());
    }

    #[test]
    fn stats_from_metadata_ignores_missing_fields() {
        let meta = serde_json::json!({"elements_created": 12, "title": "x"});
        let stats = ProcessingStats::from_metadata(&meta);
        assert_eq!(stats.elements_created, 12);
        assert_eq!(stats.relationships_created, 0);
        assert_eq!(stats.links_discovered, 0);
    }

    #[test]
    fn error_details_keeps_unknown_fields() {
        let raw = serde_json::json!({"error_type": "ParseError", "line": 42});
        let details: ErrorDetails = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(details.error_type.as_deref(), Some("ParseError"));
        assert_eq!(details.extra.get("line"), Some(&serde_json::json!(42)));
        assert_eq!(serde_json::to_value(&details).unwrap(), raw);
    }

    #[test]
    fn counts_track_total() {
        let mut counts = QueueStatusCounts::default();
        counts.add(QueueStatus::Pending, 3);
        counts.add(QueueStatus::Retry, 2);
        counts.add(QueueStatus::Completed, 5);
        assert_eq!(counts.total, 10);
        assert_eq!(counts.backlog(), 5);
    }
}
