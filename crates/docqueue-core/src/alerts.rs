//! Threshold-based alert evaluation.
//!
//! [`evaluate`] is stateless: the same snapshot and thresholds always
//! produce the same alerts, and nothing is remembered between calls.
//! De-duplication or suppression belongs to whatever consumes the alerts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::health::QueueHealth;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

/// Operator-tunable alert limits. Deserializes from the `[alerts]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Seconds a claim may stay in `processing` before it counts as stale work.
    pub stale_work_threshold: u64,
    /// Percentage (0–100) of finished items allowed to fail.
    pub max_failed_percentage: f64,
    pub max_dead_letter_items: i64,
    pub min_worker_count: i64,
    /// Mean seconds per document.
    pub max_processing_time: f64,
    /// Seconds the oldest pending item may wait.
    pub max_queue_age: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            stale_work_threshold: 600,
            max_failed_percentage: 10.0,
            max_dead_letter_items: 100,
            min_worker_count: 1,
            max_processing_time: 300.0,
            max_queue_age: 3600.0,
        }
    }
}

/// One threshold breach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub run_id: Option<String>,
    pub timestamp: String,
}

impl Alert {
    pub fn new(
        alert_type: &str,
        severity: Severity,
        message: String,
        value: f64,
        threshold: f64,
        run_id: Option<&str>,
    ) -> Self {
        Self {
            alert_type: alert_type.to_string(),
            severity,
            message,
            value,
            threshold,
            run_id: run_id.map(str::to_string),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }

    /// The alert raised when the metrics layer itself cannot be read.
    pub fn monitoring_error(error: &str, run_id: Option<&str>) -> Self {
        Self::new(
            "monitoring_error",
            Severity::Critical,
            format!("Monitoring system error: {}", error),
            0.0,
            0.0,
            run_id,
        )
    }
}

/// Compare a health snapshot against the thresholds.
///
/// `stale_over_threshold` is the number of processing items older than
/// `thresholds.stale_work_threshold`, counted by the caller because it
/// depends on a different cut-off than the snapshot's own stale count.
pub fn evaluate(
    health: &QueueHealth,
    stale_over_threshold: i64,
    thresholds: &AlertThresholds,
) -> Vec<Alert> {
    let run_id = health.run_id.as_deref();
    let mut alerts = Vec::new();

    if stale_over_threshold > 0 {
        alerts.push(Alert::new(
            "stale_work",
            Severity::Warning,
            format!(
                "{} work item(s) processing for longer than {}s",
                stale_over_threshold, thresholds.stale_work_threshold
            ),
            stale_over_threshold as f64,
            thresholds.stale_work_threshold as f64,
            run_id,
        ));
    }

    if health.completed + health.failed > 0 {
        let failed_pct = health.failure_rate() * 100.0;
        if failed_pct > thresholds.max_failed_percentage {
            alerts.push(Alert::new(
                "high_failure_rate",
                Severity::Critical,
                format!(
                    "Failure rate {:.1}% exceeds {:.1}%",
                    failed_pct, thresholds.max_failed_percentage
                ),
                failed_pct,
                thresholds.max_failed_percentage,
                run_id,
            ));
        }
    }

    if health.dead_letter > thresholds.max_dead_letter_items {
        alerts.push(Alert::new(
            "dead_letter_items",
            Severity::Warning,
            format!(
                "{} item(s) in dead letter queue (limit {})",
                health.dead_letter, thresholds.max_dead_letter_items
            ),
            health.dead_letter as f64,
            thresholds.max_dead_letter_items as f64,
            run_id,
        ));
    }

    if health.backlog() > 0 && health.worker_count < thresholds.min_worker_count {
        let severity = if health.worker_count == 0 {
            Severity::Critical
        } else {
            Severity::Warning
        };
        alerts.push(Alert::new(
            "low_worker_count",
            severity,
            format!(
                "{} active worker(s) for {} queued item(s); expected at least {}",
                health.worker_count,
                health.backlog(),
                thresholds.min_worker_count
            ),
            health.worker_count as f64,
            thresholds.min_worker_count as f64,
            run_id,
        ));
    }

    if health.average_processing_time > thresholds.max_processing_time {
        alerts.push(Alert::new(
            "slow_processing",
            Severity::Warning,
            format!(
                "Average processing time {:.1}s exceeds {:.1}s",
                health.average_processing_time, thresholds.max_processing_time
            ),
            health.average_processing_time,
            thresholds.max_processing_time,
            run_id,
        ));
    }

    if health.oldest_pending_age_seconds > thresholds.max_queue_age {
        alerts.push(Alert::new(
            "old_queue_items",
            Severity::Warning,
            format!(
                "Oldest pending item has waited {:.0}s (limit {:.0}s)",
                health.oldest_pending_age_seconds, thresholds.max_queue_age
            ),
            health.oldest_pending_age_seconds,
            thresholds.max_queue_age,
            run_id,
        ));
    }

    alerts
}
