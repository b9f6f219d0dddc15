//! Alerting on top of [`MetricsCollector`] snapshots.
//!
//! Each call reads fresh metrics and evaluates them with
//! [`docqueue_core::alerts::evaluate`]. There is no state between calls,
//! so the same breach is reported every time it is checked.
//!
//! [`AlertManager`] never returns an error. If the metrics cannot be read,
//! the result is a single critical `monitoring_error` alert.

use std::time::Duration;

use tracing::warn;

use docqueue_core::alerts::{evaluate, Alert, AlertThresholds};

use crate::error::QueueResult;
use crate::metrics::MetricsCollector;

#[derive(Clone)]
pub struct AlertManager {
    collector: MetricsCollector,
    thresholds: AlertThresholds,
}

impl AlertManager {
    pub fn new(collector: MetricsCollector, thresholds: AlertThresholds) -> Self {
        Self {
            collector,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Alerts for the queue as a whole.
    pub async fn check_alerts(&self) -> Vec<Alert> {
        match self.evaluate(None).await {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!(error = %e, "alert check failed");
                vec![Alert::monitoring_error(&e.to_string(), None)]
            }
        }
    }

    /// Alerts for one run.
    pub async fn check_run_alerts(&self, run_id: &str) -> Vec<Alert> {
        match self.evaluate(Some(run_id)).await {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!(run_id, error = %e, "alert check failed");
                vec![Alert::monitoring_error(&e.to_string(), Some(run_id))]
            }
        }
    }

    async fn evaluate(&self, run_id: Option<&str>) -> QueueResult<Vec<Alert>> {
        let health = match run_id {
            Some(run_id) => self.collector.try_get_queue_health(run_id).await?,
            None => self.collector.try_get_queue_health_metrics().await?,
        };

        let stale_over_threshold = self
            .collector
            .count_stale(
                run_id,
                Duration::from_secs(self.thresholds.stale_work_threshold),
            )
            .await?;

        Ok(evaluate(&health, stale_over_threshold, &self.thresholds))
    }
}
