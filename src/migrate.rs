//! Queue schema creation and validation.
//!
//! All three entry points are safe to call against an already-provisioned
//! database and are meant to run once at process or test startup:
//!
//! | Function | Effect |
//! |----------|--------|
//! | [`create_schema`] | `CREATE ... IF NOT EXISTS` every table and index, then validate |
//! | [`check_schema_exists`] | `true` when every queue table is present |
//! | [`validate_schema`] | error if a table lacks a required column or the version differs |
//!
//! # Tables
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `processing_runs` | One row per run id, never deleted |
//! | `document_queue` | One row per enqueued document; `status` is the lifecycle |
//! | `run_workers` | Worker registrations and heartbeats, keyed by `(worker_id, run_id)` |
//! | `document_dependencies` | Append-only parent → child discovery edges |
//! | `schema_meta` | Key/value store holding `schema_version` |

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::config::Config;
use crate::db;
use crate::error::{QueueError, QueueResult};

/// Bumped whenever a table gains or loses a required column.
pub const SCHEMA_VERSION: i64 = 1;

/// Every table with the columns the queue reads or writes.
const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    (
        "processing_runs",
        &[
            "run_id",
            "status",
            "created_at",
            "updated_at",
            "config_snapshot",
            "documents_queued",
            "documents_processed",
            "documents_failed",
        ],
    ),
    (
        "document_queue",
        &[
            "queue_id",
            "doc_id",
            "source_name",
            "run_id",
            "status",
            "claimed_by",
            "claimed_at",
            "completed_at",
            "retry_count",
            "max_retries",
            "error_message",
            "error_details",
            "content_hash",
            "metadata",
            "parent_doc_id",
            "created_at",
            "updated_at",
        ],
    ),
    (
        "run_workers",
        &[
            "worker_id",
            "run_id",
            "hostname",
            "start_time",
            "last_heartbeat",
            "documents_processed",
            "documents_failed",
            "current_document",
            "total_processing_time",
        ],
    ),
    (
        "document_dependencies",
        &[
            "run_id",
            "parent_doc_id",
            "child_doc_id",
            "link_depth",
            "created_at",
        ],
    ),
    ("schema_meta", &["key", "value"]),
];

const TABLE_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS schema_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS processing_runs (
        run_id TEXT PRIMARY KEY,
        status TEXT NOT NULL DEFAULT 'active'
            CHECK (status IN ('active', 'completed', 'failed')),
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        config_snapshot TEXT NOT NULL DEFAULT '{}',
        documents_queued INTEGER NOT NULL DEFAULT 0,
        documents_processed INTEGER NOT NULL DEFAULT 0,
        documents_failed INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_queue (
        queue_id INTEGER PRIMARY KEY AUTOINCREMENT,
        doc_id TEXT NOT NULL,
        source_name TEXT NOT NULL,
        run_id TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'processing', 'retry', 'completed', 'failed', 'dead_letter')),
        claimed_by TEXT,
        claimed_at INTEGER,
        completed_at INTEGER,
        retry_count INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL DEFAULT 3,
        error_message TEXT,
        error_details TEXT,
        content_hash TEXT,
        metadata TEXT NOT NULL DEFAULT '{}',
        parent_doc_id TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS run_workers (
        worker_id TEXT NOT NULL,
        run_id TEXT NOT NULL,
        hostname TEXT,
        start_time INTEGER NOT NULL,
        last_heartbeat INTEGER NOT NULL,
        documents_processed INTEGER NOT NULL DEFAULT 0,
        documents_failed INTEGER NOT NULL DEFAULT 0,
        current_document TEXT,
        total_processing_time REAL NOT NULL DEFAULT 0,
        PRIMARY KEY (worker_id, run_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_dependencies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        parent_doc_id TEXT NOT NULL,
        child_doc_id TEXT NOT NULL,
        link_depth INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
];

const INDEX_STATEMENTS: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_queue_claim ON document_queue(run_id, status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_queue_status_claimed ON document_queue(status, claimed_at)",
    "CREATE INDEX IF NOT EXISTS idx_queue_updated ON document_queue(status, updated_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_deps_parent ON document_dependencies(run_id, parent_doc_id)",
    "CREATE INDEX IF NOT EXISTS idx_workers_heartbeat ON run_workers(run_id, last_heartbeat)",
];

/// Create every queue table and index if missing, validating in between.
///
/// Fails with [`QueueError::IncompatibleSchema`] if a pre-existing table
/// has a different shape or the database was created by another version.
pub async fn create_schema(pool: &SqlitePool) -> QueueResult<()> {
    for statement in TABLE_STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }

    // First writer wins; later calls leave the recorded version alone.
    sqlx::query("INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?)")
        .bind(SCHEMA_VERSION.to_string())
        .execute(pool)
        .await?;

    // Indexes reference columns, so a foreign table shape must be caught first.
    validate_schema(pool).await?;

    for statement in INDEX_STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    debug!(version = SCHEMA_VERSION, "queue schema ready");
    Ok(())
}

/// `true` when every queue table exists. Does not inspect columns.
pub async fn check_schema_exists(pool: &SqlitePool) -> QueueResult<bool> {
    for (table, _) in REQUIRED_COLUMNS {
        if !table_exists(pool, table).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Verify every table has the required columns and the stored schema
/// version matches [`SCHEMA_VERSION`].
pub async fn validate_schema(pool: &SqlitePool) -> QueueResult<()> {
    for (table, columns) in REQUIRED_COLUMNS {
        if !table_exists(pool, table).await? {
            return Err(QueueError::IncompatibleSchema(format!(
                "table '{}' is missing",
                table
            )));
        }

        let present: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
            .bind(*table)
            .fetch_all(pool)
            .await?;

        let missing: Vec<&str> = columns
            .iter()
            .copied()
            .filter(|col| !present.iter().any(|p| p == col))
            .collect();

        if !missing.is_empty() {
            return Err(QueueError::IncompatibleSchema(format!(
                "table '{}' is missing column(s): {}",
                table,
                missing.join(", ")
            )));
        }
    }

    let stored: Option<String> =
        sqlx::query_scalar("SELECT value FROM schema_meta WHERE key = 'schema_version'")
            .fetch_optional(pool)
            .await?;

    match stored.as_deref().map(str::parse::<i64>) {
        Some(Ok(v)) if v == SCHEMA_VERSION => Ok(()),
        Some(Ok(v)) => Err(QueueError::IncompatibleSchema(format!(
            "schema version {} does not match expected {}",
            v, SCHEMA_VERSION
        ))),
        Some(Err(_)) | None => Err(QueueError::IncompatibleSchema(
            "schema_version is missing or unreadable".to_string(),
        )),
    }
}

async fn table_exists(pool: &SqlitePool, table: &str) -> QueueResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind(table)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Connect, create the schema, and close. Used by `dq init`.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    info!(path = %config.db.path.display(), "database initialized");
    pool.close().await;
    Ok(())
}
