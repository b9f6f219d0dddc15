//! # docqueue operator CLI (`dq`)
//!
//! The `dq` binary provisions the queue database and gives operators a
//! view into it: queue status, health, alerts, per-worker metrics, and
//! the dead-letter queue. Workers themselves are library code
//! ([`docqueue::worker`]) embedded in the ingestion pipeline.
//!
//! ## Usage
//!
//! ```bash
//! dq --config ./config/dq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dq init` | Create the queue schema (idempotent) |
//! | `dq schema check` | Report whether the schema exists and is valid |
//! | `dq run-id --pipeline <file>` | Print the run id of a pipeline config |
//! | `dq run create --pipeline <file>` | Create (or fetch) the run for a pipeline config |
//! | `dq run show <run>` | Refresh and show a run's progress counters |
//! | `dq run set-status <run> <status>` | Mark a run active, completed or failed |
//! | `dq runs` | List runs, newest first |
//! | `dq enqueue <run> <source> <doc>...` | Queue documents |
//! | `dq status <run>` | Item counts per status |
//! | `dq workers <run>` | Per-worker metrics |
//! | `dq metrics <run>` | Run totals and throughput |
//! | `dq health [--run <run>]` | Health snapshot and rating |
//! | `dq alerts [--run <run>]` | Threshold alerts |
//! | `dq history [--hours N]` | Hourly activity |
//! | `dq dlq ...` | Inspect, move, requeue and analyze dead-letter items |
//!
//! Every read command accepts `--json` to print machine-readable output.
//! A run that does not exist is reported as "not found", not as an error.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use docqueue::alerts::AlertManager;
use docqueue::config::{self, Config};
use docqueue::dead_letter::DeadLetterQueue;
use docqueue::dlq_processor::DeadLetterProcessor;
use docqueue::metrics::MetricsCollector;
use docqueue::run_coordinator::RunCoordinator;
use docqueue::work_queue::{QueueOptions, WorkQueue};
use docqueue::{db, logging, migrate, monitor};
use docqueue_core::models::{ErrorDetails, RunStatus};

/// Worker id the CLI uses when it writes to the queue on an operator's behalf.
const CLI_WORKER_ID: &str = "dq-cli";

/// docqueue operator CLI: provision, inspect and repair a document work queue.
#[derive(Parser)]
#[command(
    name = "dq",
    about = "docqueue: operate a distributed document processing queue",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/dq.toml`. Only `[db].path` is required.
    #[arg(long, global = true, default_value = "./config/dq.toml")]
    config: PathBuf,

    /// Print JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the queue schema. Safe to run repeatedly.
    Init,

    /// Inspect the database schema.
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// Print the run id derived from a pipeline configuration.
    ///
    /// Only the content_sources, storage, embedding and
    /// relationship_detection sections affect the id.
    RunId {
        /// Pipeline configuration file (TOML).
        #[arg(long)]
        pipeline: PathBuf,
    },

    /// Manage a single run.
    Run {
        #[command(subcommand)]
        action: RunAction,
    },

    /// List runs, newest first.
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Queue one or more documents for a run.
    Enqueue {
        run_id: String,
        /// Content source the documents come from.
        source: String,
        #[arg(required = true)]
        doc_ids: Vec<String>,
    },

    /// Item counts per status for a run.
    Status { run_id: String },

    /// Per-worker metrics for a run.
    Workers { run_id: String },

    /// Run totals, worker counts and throughput.
    Metrics { run_id: String },

    /// Queue health snapshot, for one run or all runs.
    Health {
        #[arg(long)]
        run: Option<String>,
    },

    /// Evaluate alert thresholds, for one run or all runs.
    Alerts {
        #[arg(long)]
        run: Option<String>,
    },

    /// Hourly queued / completed / failed counts.
    History {
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },

    /// Dead-letter queue operations.
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },
}

#[derive(Subcommand)]
enum SchemaAction {
    /// Report whether the schema exists and matches this version.
    Check,
}

#[derive(Subcommand)]
enum RunAction {
    /// Create the run for a pipeline configuration, or return the existing one.
    Create {
        #[arg(long)]
        pipeline: PathBuf,
    },
    /// Recompute and show a run's progress counters.
    Show { run_id: String },
    /// Set a run's status.
    SetStatus {
        run_id: String,
        /// `active`, `completed` or `failed`.
        status: String,
    },
}

#[derive(Subcommand)]
enum DlqAction {
    /// List dead-lettered items, most recent first.
    List {
        #[arg(long)]
        run: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Quarantine an item so no worker claims it again.
    Move {
        queue_id: i64,
        message: String,
        /// Error type recorded with the item; overrides keyword classification.
        #[arg(long)]
        error_type: Option<String>,
    },
    /// Return one dead-lettered item to the queue.
    Retry { queue_id: i64 },
    /// Return every dead-lettered item of a run to the queue.
    RetryAll { run_id: String },
    /// Group a run's dead-lettered items by error type.
    Analyze { run_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that don't need the queue config
    if let Commands::RunId { pipeline } = &cli.command {
        return print_run_id(pipeline, cli.json);
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Schema {
            action: SchemaAction::Check,
        } => schema_check(&cfg, cli.json).await?,
        Commands::RunId { pipeline } => print_run_id(&pipeline, cli.json)?,
        Commands::Run { action } => run_action(&cfg, action, cli.json).await?,
        Commands::Runs { limit } => {
            let pool = db::connect(&cfg).await?;
            let runs = RunCoordinator::new(pool.clone()).list_runs(limit).await?;
            if cli.json {
                monitor::print_json(&runs)?;
            } else {
                monitor::print_runs(&runs);
            }
            pool.close().await;
        }
        Commands::Enqueue {
            run_id,
            source,
            doc_ids,
        } => {
            let pool = db::connect(&cfg).await?;
            let queue = WorkQueue::with_options(
                pool.clone(),
                CLI_WORKER_ID,
                QueueOptions::from(&cfg.queue),
            );
            let mut queue_ids = Vec::with_capacity(doc_ids.len());
            for doc_id in &doc_ids {
                queue_ids.push(queue.add_document(doc_id, &source, &run_id, None).await?);
            }
            if cli.json {
                monitor::print_json(&queue_ids)?;
            } else {
                println!("Queued {} document(s) for run {}.", queue_ids.len(), run_id);
            }
            pool.close().await;
        }
        Commands::Status { run_id } => {
            let pool = db::connect(&cfg).await?;
            let counts = WorkQueue::new(pool.clone(), CLI_WORKER_ID)
                .get_queue_status(&run_id)
                .await?;
            let known = counts.total > 0
                || RunCoordinator::new(pool.clone())
                    .get_run(&run_id)
                    .await?
                    .is_some();
            match (known, cli.json) {
                (false, true) => monitor::print_json(&None::<()>)?,
                (false, false) => monitor::print_not_found("Run", &run_id),
                (true, true) => monitor::print_json(&counts)?,
                (true, false) => monitor::print_status(&run_id, &counts),
            }
            pool.close().await;
        }
        Commands::Workers { run_id } => {
            let pool = db::connect(&cfg).await?;
            let workers = MetricsCollector::from_config(pool.clone(), &cfg)
                .get_worker_metrics(&run_id)
                .await;
            if cli.json {
                monitor::print_json(&workers)?;
            } else {
                monitor::print_workers(&workers);
            }
            pool.close().await;
        }
        Commands::Metrics { run_id } => {
            let pool = db::connect(&cfg).await?;
            let metrics = MetricsCollector::from_config(pool.clone(), &cfg)
                .get_run_metrics(&run_id)
                .await;
            match (&metrics, cli.json) {
                (_, true) => monitor::print_json(&metrics)?,
                (Some(m), false) => monitor::print_run_metrics(m),
                (None, false) => monitor::print_not_found("Run", &run_id),
            }
            pool.close().await;
        }
        Commands::Health { run } => {
            let pool = db::connect(&cfg).await?;
            let collector = MetricsCollector::from_config(pool.clone(), &cfg);
            let health = match run.as_deref() {
                Some(run_id) => collector.get_queue_health(run_id).await,
                None => collector.get_queue_health_metrics().await,
            };
            if cli.json {
                monitor::print_json(&health)?;
            } else {
                monitor::print_health(&health);
            }
            pool.close().await;
        }
        Commands::Alerts { run } => {
            let pool = db::connect(&cfg).await?;
            let manager = AlertManager::new(
                MetricsCollector::from_config(pool.clone(), &cfg),
                cfg.alerts.clone(),
            );
            let alerts = match run.as_deref() {
                Some(run_id) => manager.check_run_alerts(run_id).await,
                None => manager.check_alerts().await,
            };
            if cli.json {
                monitor::print_json(&alerts)?;
            } else {
                monitor::print_alerts(&alerts);
            }
            pool.close().await;
        }
        Commands::History { hours } => {
            let pool = db::connect(&cfg).await?;
            let buckets = MetricsCollector::from_config(pool.clone(), &cfg)
                .get_historical_metrics(hours)
                .await;
            if cli.json {
                monitor::print_json(&buckets)?;
            } else {
                monitor::print_history(&buckets);
            }
            pool.close().await;
        }
        Commands::Dlq { action } => dlq_action(&cfg, action, cli.json).await?,
    }

    Ok(())
}

fn print_run_id(pipeline: &Path, json: bool) -> Result<()> {
    let value = config::load_pipeline_config(pipeline)?;
    let run_id = RunCoordinator::get_run_id_from_config(&value);
    if json {
        monitor::print_json(&serde_json::json!({ "run_id": run_id }))?;
    } else {
        println!("{}", run_id);
    }
    Ok(())
}

async fn schema_check(cfg: &Config, json: bool) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let exists = migrate::check_schema_exists(&pool).await?;
    let problem = if exists {
        migrate::validate_schema(&pool).await.err().map(|e| e.to_string())
    } else {
        Some("schema not initialized; run `dq init`".to_string())
    };
    pool.close().await;

    if json {
        monitor::print_json(&serde_json::json!({
            "exists": exists,
            "valid": problem.is_none(),
            "error": problem,
        }))?;
    } else {
        match problem {
            None => println!("Schema OK (version {}).", migrate::SCHEMA_VERSION),
            Some(reason) => println!("Schema problem: {}", reason),
        }
    }
    Ok(())
}

async fn run_action(cfg: &Config, action: RunAction, json: bool) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let coordinator = RunCoordinator::new(pool.clone());

    match action {
        RunAction::Create { pipeline } => {
            let value = config::load_pipeline_config(&pipeline)?;
            let run_id = RunCoordinator::get_run_id_from_config(&value);
            let run = coordinator.ensure_run_exists(&run_id, &value).await?;
            if json {
                monitor::print_json(&run)?;
            } else {
                println!("{}", run.run_id);
            }
        }
        RunAction::Show { run_id } => {
            let run = coordinator.refresh_run_progress(&run_id).await?;
            match (&run, json) {
                (_, true) => monitor::print_json(&run)?,
                (Some(run), false) => monitor::print_runs(std::slice::from_ref(run)),
                (None, false) => monitor::print_not_found("Run", &run_id),
            }
        }
        RunAction::SetStatus { run_id, status } => {
            let status: RunStatus = status
                .parse()
                .with_context(|| format!("invalid run status '{}'", status))?;
            coordinator.refresh_run_progress(&run_id).await?;
            if coordinator.update_run_status(&run_id, status).await? {
                println!("Run {} is now {}.", run_id, status);
            } else {
                monitor::print_not_found("Run", &run_id);
            }
        }
    }

    pool.close().await;
    Ok(())
}

async fn dlq_action(cfg: &Config, action: DlqAction, json: bool) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let dlq = DeadLetterQueue::new(pool.clone());

    match action {
        DlqAction::List { run, limit } => {
            let items = dlq.list_dead_letter_items(run.as_deref(), limit).await?;
            if json {
                monitor::print_json(&items)?;
            } else {
                monitor::print_dead_letter(&items);
            }
        }
        DlqAction::Move {
            queue_id,
            message,
            error_type,
        } => {
            let details = error_type.map(|t| ErrorDetails::typed(t).with_stage("manual"));
            if dlq
                .move_to_dead_letter(queue_id, &message, details.as_ref())
                .await?
            {
                println!("Moved queue item {} to the dead letter queue.", queue_id);
            } else {
                monitor::print_not_found("Queue item", &queue_id.to_string());
            }
        }
        DlqAction::Retry { queue_id } => {
            if dlq.retry_from_dead_letter(queue_id).await? {
                println!("Requeued queue item {}.", queue_id);
            } else {
                println!("Queue item {} is not in the dead letter queue.", queue_id);
            }
        }
        DlqAction::RetryAll { run_id } => {
            let count = dlq.retry_all_from_dead_letter(&run_id).await?;
            println!("Requeued {} item(s) for run {}.", count, run_id);
        }
        DlqAction::Analyze { run_id } => {
            let processor = DeadLetterProcessor::new(pool.clone());
            let summary = processor.get_dead_letter_summary(&run_id).await?;
            let patterns = processor.analyze_failure_patterns(&run_id).await?;
            if json {
                monitor::print_json(&serde_json::json!({
                    "summary": summary,
                    "patterns": patterns,
                }))?;
            } else {
                monitor::print_analysis(&summary, &patterns);
            }
        }
    }

    pool.close().await;
    Ok(())
}
