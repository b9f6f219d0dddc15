//! The worker poll loop: claim, process, report, repeat.
//!
//! A [`Worker`] owns nothing but handles to the store. The actual work is
//! done by a [`DocumentProcessor`], the boundary to whatever parses,
//! chunks or embeds documents. The loop maps its outcome onto the queue:
//!
//! | Outcome | Queue call |
//! |---------|------------|
//! | `Ok(ProcessOutcome)` | `mark_completed_with_stats`, then `add_linked_document` for each link |
//! | `Err(ProcessError::Transient)` | `mark_failed` (retried up to `max_retries`) |
//! | `Err(ProcessError::Permanent)` | `mark_dead_letter` (never retried automatically) |
//!
//! Links are only enqueued once the completion is accepted, so a parent
//! whose claim was lost leaves no children behind.
//!
//! Store errors end the loop and are returned: a worker that cannot
//! report must stop claiming. Its in-flight claim is recovered by another
//! worker once the claim timeout passes.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use docqueue::worker::{DocumentProcessor, ProcessError, ProcessOutcome, Worker, WorkerOptions};
//! use docqueue::work_queue::QueueOptions;
//! use docqueue_core::models::DocumentQueueItem;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl DocumentProcessor for Echo {
//!     async fn process(&self, item: &DocumentQueueItem) -> Result<ProcessOutcome, ProcessError> {
//!         Ok(ProcessOutcome::hashed(format!("sha256:{}", item.doc_id)))
//!     }
//! }
//!
//! # async fn demo(pool: sqlx::SqlitePool, config: docqueue::config::Config) -> anyhow::Result<()> {
//! let worker = Worker::new(
//!     pool,
//!     "3f9a1c2b7d4e5f60",
//!     QueueOptions::from(&config.queue),
//!     WorkerOptions::from_config(&config),
//! );
//! let report = worker.run(&Echo, CancellationToken::new()).await?;
//! println!("processed {}", report.processed);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use docqueue_core::models::{DocumentQueueItem, ErrorDetails, ProcessingStats, WorkerInfo};

use crate::config::Config;
use crate::error::QueueResult;
use crate::run_coordinator::RunCoordinator;
use crate::work_queue::{QueueOptions, WorkQueue};

/// Does the real work for one claimed document.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    async fn process(&self, item: &DocumentQueueItem) -> Result<ProcessOutcome, ProcessError>;
}

/// A successfully processed document.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub content_hash: Option<String>,
    pub stats: ProcessingStats,
    /// Documents discovered while processing; each is enqueued as a child.
    pub linked: Vec<LinkedDocument>,
}

impl ProcessOutcome {
    pub fn hashed(content_hash: impl Into<String>) -> Self {
        Self {
            content_hash: Some(content_hash.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedDocument {
    pub doc_id: String,
    pub source_name: String,
    pub link_depth: i64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessError {
    /// Worth another attempt (timeouts, flaky network).
    #[error("{0}")]
    Transient(String),
    /// Will fail the same way every time (corrupt input, unsupported format).
    #[error("{message}")]
    Permanent {
        message: String,
        details: Option<ErrorDetails>,
    },
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Sleep between polls when nothing is claimable.
    pub poll_interval: Duration,
    /// Stop after this many consecutive empty polls. `None` runs until cancelled.
    pub max_idle_polls: Option<u32>,
    pub info: WorkerInfo,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_idle_polls: None,
            info: WorkerInfo::default(),
        }
    }
}

impl WorkerOptions {
    /// Options from the `[worker]` section, tagged with the local hostname.
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.worker.poll_interval(),
            max_idle_polls: None,
            info: WorkerInfo {
                hostname: local_hostname(),
            },
        }
    }
}

/// What one call to [`Worker::run`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub processed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub linked: u64,
}

pub struct Worker {
    run_id: String,
    coordinator: RunCoordinator,
    queue: WorkQueue,
    options: WorkerOptions,
}

impl Worker {
    /// A worker with a freshly generated id (see [`generate_worker_id`]).
    pub fn new(
        pool: SqlitePool,
        run_id: impl Into<String>,
        queue_options: QueueOptions,
        options: WorkerOptions,
    ) -> Self {
        let worker_id = generate_worker_id(options.info.hostname.as_deref());
        Self::with_id(pool, run_id, worker_id, queue_options, options)
    }

    pub fn with_id(
        pool: SqlitePool,
        run_id: impl Into<String>,
        worker_id: impl Into<String>,
        queue_options: QueueOptions,
        options: WorkerOptions,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            coordinator: RunCoordinator::new(pool.clone()),
            queue: WorkQueue::with_options(pool, worker_id, queue_options),
            options,
        }
    }

    pub fn worker_id(&self) -> &str {
        self.queue.worker_id()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Poll until `shutdown` fires, the idle limit is reached, or the store fails.
    pub async fn run<P>(&self, processor: &P, shutdown: CancellationToken) -> QueueResult<WorkerReport>
    where
        P: DocumentProcessor + ?Sized,
    {
        let mut report = WorkerReport::default();
        let mut idle_polls = 0u32;

        info!(run_id = %self.run_id, worker_id = %self.worker_id(), "worker started");

        while !shutdown.is_cancelled() {
            self.coordinator
                .register_worker(&self.run_id, self.worker_id(), &self.options.info)
                .await?;

            match self.queue.claim_next_document(&self.run_id).await? {
                Some(item) => {
                    idle_polls = 0;
                    self.handle(processor, &item, &mut report).await?;
                }
                None => {
                    idle_polls += 1;
                    if self.options.max_idle_polls.is_some_and(|max| idle_polls >= max) {
                        debug!(worker_id = %self.worker_id(), idle_polls, "idle limit reached");
                        break;
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.options.poll_interval) => {}
                    }
                }
            }
        }

        info!(
            run_id = %self.run_id,
            worker_id = %self.worker_id(),
            processed = report.processed,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            "worker stopped"
        );
        Ok(report)
    }

    async fn handle<P>(
        &self,
        processor: &P,
        item: &DocumentQueueItem,
        report: &mut WorkerReport,
    ) -> QueueResult<()>
    where
        P: DocumentProcessor + ?Sized,
    {
        match processor.process(item).await {
            Ok(outcome) => {
                let completed = self
                    .queue
                    .mark_completed_with_stats(
                        item.queue_id,
                        outcome.content_hash.as_deref(),
                        &outcome.stats,
                    )
                    .await?;
                if !completed {
                    return Ok(());
                }
                report.processed += 1;

                for link in &outcome.linked {
                    let added = self
                        .queue
                        .add_linked_document(
                            &item.doc_id,
                            &link.doc_id,
                            &link.source_name,
                            &self.run_id,
                            link.link_depth,
                        )
                        .await?;
                    if added {
                        report.linked += 1;
                    }
                }
            }
            Err(ProcessError::Transient(message)) => {
                if self.queue.mark_failed(item.queue_id, &message).await? {
                    report.failed += 1;
                }
            }
            Err(ProcessError::Permanent { message, details }) => {
                if self
                    .queue
                    .mark_dead_letter(item.queue_id, &message, details.as_ref())
                    .await?
                {
                    report.dead_lettered += 1;
                }
            }
        }
        Ok(())
    }
}

/// `<hostname>-<8 hex>`, or `worker-<8 hex>` without a hostname.
pub fn generate_worker_id(hostname: Option<&str>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let prefix = hostname
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .unwrap_or("worker");
    format!("{}-{}", prefix, &suffix[..8])
}

/// Best-effort local hostname from `$HOSTNAME` or `/etc/hostname`.
pub fn local_hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}
