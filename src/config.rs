//! Configuration parsing and validation.
//!
//! docqueue is configured via a TOML file (default `./config/dq.toml`).
//! Only `[db].path` is required; every other section falls back to
//! defaults suitable for a single host.
//!
//! ```toml
//! [db]
//! path = "./data/dq.sqlite"
//!
//! [queue]
//! claim_timeout_secs = 300
//! max_retries = 3
//!
//! [alerts]
//! max_failed_percentage = 10.0
//! ```
//!
//! This is the queue's own configuration. The pipeline configuration that
//! run ids are derived from is a separate document; see
//! [`crate::run_coordinator::RunCoordinator::get_run_id_from_config`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub use docqueue_core::alerts::AlertThresholds;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub alerts: AlertThresholds,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    8
}
fn default_busy_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Seconds before a `processing` claim may be taken over by another worker.
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: u64,
    /// Failures tolerated before an item becomes `failed`.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            claim_timeout_secs: default_claim_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl QueueConfig {
    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_secs)
    }
}

fn default_claim_timeout_secs() -> u64 {
    300
}
fn default_max_retries() -> i64 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitoringConfig {
    /// A worker counts as live if it heartbeated within this many seconds.
    #[serde(default = "default_heartbeat_window_secs")]
    pub heartbeat_window_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            heartbeat_window_secs: default_heartbeat_window_secs(),
        }
    }
}

impl MonitoringConfig {
    pub fn heartbeat_window(&self) -> Duration {
        Duration::from_secs(self.heartbeat_window_secs)
    }
}

fn default_heartbeat_window_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Config {
    /// All-defaults configuration pointing at `db_path`.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
                max_connections: default_max_connections(),
                busy_timeout_ms: default_busy_timeout_ms(),
            },
            queue: QueueConfig::default(),
            monitoring: MonitoringConfig::default(),
            alerts: AlertThresholds::default(),
            logging: LoggingConfig::default(),
            worker: WorkerConfig::default(),
        }
    }

    /// Check cross-field constraints that serde defaults can't express.
    pub fn validate(&self) -> Result<()> {
        if self.db.max_connections == 0 {
            bail!("db.max_connections must be >= 1");
        }
        if self.queue.claim_timeout_secs == 0 {
            bail!("queue.claim_timeout_secs must be > 0");
        }
        if self.queue.max_retries < 0 {
            bail!("queue.max_retries must be >= 0");
        }
        if !(0.0..=100.0).contains(&self.alerts.max_failed_percentage) {
            bail!("alerts.max_failed_percentage must be in [0.0, 100.0]");
        }
        if self.alerts.max_dead_letter_items < 0 || self.alerts.min_worker_count < 0 {
            bail!("alerts.max_dead_letter_items and alerts.min_worker_count must be >= 0");
        }
        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Read a pipeline configuration (TOML) as a JSON value for run-id derivation.
pub fn load_pipeline_config(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline config: {}", path.display()))?;
    let value: serde_json::Value = toml::from_str(&content)
        .with_context(|| format!("Failed to parse pipeline config: {}", path.display()))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_db_path_is_required() {
        let cfg = parse_config("[db]\npath = \"/tmp/q.sqlite\"\n").unwrap();
        assert_eq!(cfg.queue.claim_timeout_secs, 300);
        assert_eq!(cfg.queue.max_retries, 3);
        assert_eq!(cfg.monitoring.heartbeat_window_secs, 60);
        assert_eq!(cfg.alerts, AlertThresholds::default());
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.db.max_connections, 8);
    }

    #[test]
    fn partial_alert_table_keeps_defaults() {
        let cfg = parse_config(
            r#"
            [db]
            path = "/tmp/q.sqlite"

            [alerts]
            max_failed_percentage = 25.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.alerts.max_failed_percentage, 25.0);
        assert_eq!(cfg.alerts.min_worker_count, 1);
    }

    #[test]
    fn rejects_zero_claim_timeout() {
        let err = parse_config(
            r#"
            [db]
            path = "/tmp/q.sqlite"

            [queue]
            claim_timeout_secs = 0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("claim_timeout_secs"));
    }

    #[test]
    fn rejects_out_of_range_percentage() {
        let err = parse_config(
            r#"
            [db]
            path = "/tmp/q.sqlite"

            [alerts]
            max_failed_percentage = 150.0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_failed_percentage"));
    }

    #[test]
    fn missing_db_section_fails() {
        assert!(parse_config("[queue]\nmax_retries = 1\n").is_err());
    }
}
