#![allow(dead_code)]

use std::time::Duration;

use docqueue::config::Config;
use docqueue::work_queue::{QueueOptions, WorkQueue};
use docqueue::{db, migrate};
use sqlx::SqlitePool;
use tempfile::TempDir;

pub const RUN: &str = "0123456789abcdef";

/// A fresh database with the schema in place. Keep the `TempDir` alive.
pub async fn setup() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let config = Config::minimal(tmp.path().join("data").join("dq.sqlite"));
    let pool = db::connect(&config).await.unwrap();
    migrate::create_schema(&pool).await.unwrap();
    (tmp, pool)
}

pub fn queue(pool: &SqlitePool, worker_id: &str) -> WorkQueue {
    WorkQueue::new(pool.clone(), worker_id)
}

pub fn queue_with(
    pool: &SqlitePool,
    worker_id: &str,
    claim_timeout: Duration,
    max_retries: i64,
) -> WorkQueue {
    WorkQueue::with_options(
        pool.clone(),
        worker_id,
        QueueOptions {
            claim_timeout,
            max_retries,
        },
    )
}

/// Enqueue `n` documents named `doc-0..n` from source `docs`.
pub async fn enqueue_many(queue: &WorkQueue, run_id: &str, n: usize) -> Vec<i64> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        ids.push(
            queue
                .add_document(&format!("doc-{}", i), "docs", run_id, None)
                .await
                .unwrap(),
        );
    }
    ids
}
