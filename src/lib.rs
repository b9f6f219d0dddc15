//! # docqueue
//!
//! A distributed work queue for document ingestion pipelines.
//!
//! Any number of worker processes claim documents from a shared SQLite
//! database, process them, and report back. The database is the only
//! coordination point: claims are single atomic statements, crashed
//! workers are recovered by claim timeout, transient failures are retried,
//! and permanently broken documents are quarantined in a dead-letter
//! status for operators to inspect.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  ┌──────────┐  ┌──────────┐
//! │ worker A │  │ worker B │  │ worker C │   claim → process → report
//! └────┬─────┘  └────┬─────┘  └────┬─────┘
//!      └─────────────┼─────────────┘
//!                    ▼
//!             ┌─────────────┐
//!             │   SQLite    │  runs, queue items, workers, links
//!             └──────┬──────┘
//!                    │ read-only
//!          ┌─────────┴─────────┐
//!          ▼                   ▼
//!     ┌─────────┐        ┌──────────┐
//!     │ metrics │───────▶│  alerts  │──▶ dq CLI / dashboards
//!     └─────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dq init                                   # create the schema
//! dq run create --pipeline pipeline.toml    # prints the run id
//! dq enqueue <run> docs guide.md faq.md     # queue documents
//! dq status <run>
//! dq alerts --run <run>
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Connection pool |
//! | [`migrate`] | Schema creation and validation |
//! | [`run_coordinator`] | Run ids, run lifecycle, worker heartbeats |
//! | [`work_queue`] | Enqueue, claim, complete, fail, linked documents |
//! | [`dead_letter`] | Quarantine and requeue |
//! | [`dlq_processor`] | Failure pattern analysis |
//! | [`metrics`] | Read-only queue, run, worker and hourly metrics |
//! | [`alerts`] | Threshold alerts over metrics |
//! | [`worker`] | Reusable worker poll loop |
//! | [`monitor`] | Terminal rendering for `dq` |
//! | [`logging`] | Tracing subscriber setup |
//!
//! Store-free types and logic (statuses, run-id hashing, failure
//! classification, health rating) live in the `docqueue-core` crate.

pub mod alerts;
pub mod config;
pub mod db;
pub mod dead_letter;
pub mod dlq_processor;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod migrate;
pub mod monitor;
pub mod run_coordinator;
pub mod work_queue;
pub mod worker;

mod rows;
