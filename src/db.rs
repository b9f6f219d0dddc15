//! SQLite connection management.
//!
//! The pool opened here is the one store handle every component shares.
//! It is created by the process entry point and handed to each component's
//! constructor; nothing in the crate opens connections lazily.
//!
//! # Concurrency settings
//!
//! - **WAL** journal mode, so dashboards reading metrics never block the
//!   workers that are claiming and completing items.
//! - **busy_timeout**, so concurrent writers queue up behind SQLite's
//!   single write lock instead of failing with `SQLITE_BUSY`.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::Config;

/// Create a connection pool to the configured SQLite database.
///
/// Creates the database file and its parent directories if they don't
/// exist. The schema is not touched; see [`crate::migrate::create_schema`].
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.db.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.db.max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}
