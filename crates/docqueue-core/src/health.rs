//! Queue health snapshot and its categorical rating.
//!
//! The rating uses fixed thresholds so two dashboards looking at the same
//! snapshot always agree. Alerting with operator-tunable limits lives in
//! [`crate::alerts`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::QueueStatusCounts;

/// Failure rate above which a queue is unhealthy.
pub const UNHEALTHY_FAILURE_RATE: f64 = 0.25;
/// Failure rate above which a queue is degraded.
pub const DEGRADED_FAILURE_RATE: f64 = 0.10;
/// More stale claims than this is unhealthy; any at all is degraded.
pub const UNHEALTHY_STALE_ITEMS: i64 = 10;
/// Oldest pending item age (seconds) above which a queue is degraded.
pub const DEGRADED_QUEUE_AGE_SECS: f64 = 3600.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl OverallHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallHealth::Healthy => "healthy",
            OverallHealth::Degraded => "degraded",
            OverallHealth::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time health of the queue, either for one run or for all runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueHealth {
    pub run_id: Option<String>,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub retry: i64,
    pub dead_letter: i64,
    /// Seconds since the oldest pending item was enqueued; 0 when none.
    pub oldest_pending_age_seconds: f64,
    /// Mean claim-to-completion time in seconds over completed items.
    pub average_processing_time: f64,
    /// Processing items whose claim has outlived the claim timeout.
    pub stale_work_items: i64,
    /// Workers whose heartbeat falls inside the recency window.
    pub worker_count: i64,
    pub overall_health: OverallHealth,
}

impl QueueHealth {
    /// Build a snapshot from raw counts and rate it.
    pub fn from_parts(
        run_id: Option<String>,
        counts: &QueueStatusCounts,
        oldest_pending_age_seconds: f64,
        average_processing_time: f64,
        stale_work_items: i64,
        worker_count: i64,
    ) -> Self {
        let mut health = Self {
            run_id,
            pending: counts.pending,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            retry: counts.retry,
            dead_letter: counts.dead_letter,
            oldest_pending_age_seconds,
            average_processing_time,
            stale_work_items,
            worker_count,
            overall_health: OverallHealth::Healthy,
        };
        health.overall_health = categorize(&health);
        health
    }

    /// failed / (completed + failed), or 0 when nothing has finished.
    pub fn failure_rate(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished == 0 {
            0.0
        } else {
            self.failed as f64 / finished as f64
        }
    }

    pub fn backlog(&self) -> i64 {
        self.pending + self.retry
    }

    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed + self.retry + self.dead_letter
    }
}

/// Rate a snapshot. Ignores the snapshot's current `overall_health`.
pub fn categorize(health: &QueueHealth) -> OverallHealth {
    let failure_rate = health.failure_rate();

    if failure_rate > UNHEALTHY_FAILURE_RATE
        || (health.backlog() > 0 && health.worker_count == 0)
        || health.stale_work_items > UNHEALTHY_STALE_ITEMS
    {
        return OverallHealth::Unhealthy;
    }

    if failure_rate > DEGRADED_FAILURE_RATE
        || health.stale_work_items > 0
        || health.dead_letter > 0
        || health.oldest_pending_age_seconds > DEGRADED_QUEUE_AGE_SECS
    {
        return OverallHealth::Degraded;
    }

    OverallHealth::Healthy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pending: i64, completed: i64, failed: i64, dead_letter: i64) -> QueueStatusCounts {
        QueueStatusCounts {
            pending,
            completed,
            failed,
            dead_letter,
            total: pending + completed + failed + dead_letter,
            ..QueueStatusCounts::default()
        }
    }

    #[test]
    fn idle_empty_queue_is_healthy() {
        let h = QueueHealth::from_parts(None, &QueueStatusCounts::default(), 0.0, 0.0, 0, 0);
        assert_eq!(h.overall_health, OverallHealth::Healthy);
    }

    #[test]
    fn backlog_without_workers_is_unhealthy() {
        let h = QueueHealth::from_parts(None, &counts(5, 0, 0, 0), 10.0, 0.0, 0, 0);
        assert_eq!(h.overall_health, OverallHealth::Unhealthy);
    }

    #[test]
    fn failure_rate_thresholds() {
        // 1 / 20 = 5%
        let ok = QueueHealth::from_parts(None, &counts(0, 19, 1, 0), 0.0, 1.0, 0, 2);
        assert_eq!(ok.overall_health, OverallHealth::Healthy);
        // 2 / 10 = 20%
        let degraded = QueueHealth::from_parts(None, &counts(0, 8, 2, 0), 0.0, 1.0, 0, 2);
        assert_eq!(degraded.overall_health, OverallHealth::Degraded);
        // 3 / 10 = 30%
        let bad = QueueHealth::from_parts(None, &counts(0, 7, 3, 0), 0.0, 1.0, 0, 2);
        assert_eq!(bad.overall_health, OverallHealth::Unhealthy);
        assert!((bad.failure_rate() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn stale_and_dead_letter_degrade() {
        let stale = QueueHealth::from_parts(None, &counts(0, 5, 0, 0), 0.0, 1.0, 1, 1);
        assert_eq!(stale.overall_health, OverallHealth::Degraded);
        let very_stale = QueueHealth::from_parts(None, &counts(0, 5, 0, 0), 0.0, 1.0, 11, 1);
        assert_eq!(very_stale.overall_health, OverallHealth::Unhealthy);
        let dlq = QueueHealth::from_parts(None, &counts(0, 5, 0, 1), 0.0, 1.0, 0, 1);
        assert_eq!(dlq.overall_health, OverallHealth::Degraded);
    }

    #[test]
    fn old_backlog_degrades() {
        let h = QueueHealth::from_parts(None, &counts(3, 5, 0, 0), 7200.0, 1.0, 0, 1);
        assert_eq!(h.overall_health, OverallHealth::Degraded);
    }

    #[test]
    fn serializes_health_as_snake_case() {
        let h = QueueHealth::from_parts(Some("r".into()), &counts(1, 0, 0, 0), 0.0, 0.0, 0, 0);
        let json = serde_json::to_value(&h).unwrap();
        assert_eq!(json["overall_health"], "unhealthy");
        assert_eq!(json["run_id"], "r");
    }
}
