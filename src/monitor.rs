//! Terminal rendering for the `dq` operator commands.
//!
//! Every printer writes to stdout. With `--json` the CLI bypasses these
//! and prints the underlying value with [`print_json`] instead, so the
//! tables here are free to change shape.

use anyhow::Result;
use serde::Serialize;

use docqueue_core::alerts::Alert;
use docqueue_core::failure::FailurePattern;
use docqueue_core::health::QueueHealth;
use docqueue_core::models::{now_millis, ProcessingRun, QueueStatusCounts};

use crate::dead_letter::DeadLetterItem;
use crate::dlq_processor::DeadLetterSummary;
use crate::metrics::{HourlyMetrics, RunMetrics, WorkerMetrics};

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_not_found(what: &str, id: &str) {
    println!("{} {} not found.", what, id);
}

pub fn print_status(run_id: &str, counts: &QueueStatusCounts) {
    println!("Queue status for run {}", run_id);
    println!("{}", "=".repeat(15 + run_id.len()));
    println!();
    println!("  Pending:      {}", counts.pending);
    println!("  Processing:   {}", counts.processing);
    println!("  Retry:        {}", counts.retry);
    println!("  Completed:    {}", counts.completed);
    println!("  Failed:       {}", counts.failed);
    println!("  Dead letter:  {}", counts.dead_letter);
    println!("  ------------");
    println!("  Total:        {}", counts.total);
    println!();
}

pub fn print_health(health: &QueueHealth) {
    let scope = health.run_id.as_deref().unwrap_or("all runs");
    println!("Queue health ({}): {}", scope, health.overall_health.as_str().to_uppercase());
    println!();
    println!(
        "  Pending {}  Processing {}  Retry {}  Completed {}  Failed {}  Dead letter {}",
        health.pending,
        health.processing,
        health.retry,
        health.completed,
        health.failed,
        health.dead_letter
    );
    println!("  Failure rate:        {}", format_percent(health.failure_rate() * 100.0));
    println!("  Oldest pending:      {}", format_duration(health.oldest_pending_age_seconds));
    println!("  Avg processing time: {}", format_duration(health.average_processing_time));
    println!("  Stale claims:        {}", health.stale_work_items);
    println!("  Live workers:        {}", health.worker_count);
    println!();
}

pub fn print_alerts(alerts: &[Alert]) {
    if alerts.is_empty() {
        println!("No alerts.");
        return;
    }

    println!("  {:<9} {:<20} {}", "SEVERITY", "TYPE", "MESSAGE");
    println!("  {}", "-".repeat(76));
    for alert in alerts {
        println!(
            "  {:<9} {:<20} {}",
            alert.severity.to_string().to_uppercase(),
            alert.alert_type,
            alert.message
        );
    }
    println!();
}

pub fn print_runs(runs: &[ProcessingRun]) {
    if runs.is_empty() {
        println!("No runs.");
        return;
    }

    println!(
        "  {:<18} {:<10} {:>7} {:>9} {:>7}   {}",
        "RUN", "STATUS", "QUEUED", "PROCESSED", "FAILED", "CREATED"
    );
    println!("  {}", "-".repeat(76));
    for run in runs {
        println!(
            "  {:<18} {:<10} {:>7} {:>9} {:>7}   {}",
            run.run_id,
            run.status.as_str(),
            run.documents_queued,
            run.documents_processed,
            run.documents_failed,
            format_ts_relative(run.created_at)
        );
    }
    println!();
}

pub fn print_workers(workers: &[WorkerMetrics]) {
    if workers.is_empty() {
        println!("No workers registered.");
        return;
    }

    println!(
        "  {:<28} {:>6} {:>6} {:>9} {:>9}   {:<14} {}",
        "WORKER", "DONE", "FAILED", "ELEMENTS", "AVG TIME", "HEARTBEAT", "CURRENT"
    );
    println!("  {}", "-".repeat(96));
    for w in workers {
        println!(
            "  {:<28} {:>6} {:>6} {:>9} {:>9}   {:<14} {}",
            w.worker_id,
            w.documents_processed,
            w.documents_failed,
            w.elements_created,
            format_duration(w.avg_processing_time),
            format_ts_relative(w.last_heartbeat),
            w.current_document.as_deref().unwrap_or("-")
        );
    }
    println!();
}

pub fn print_run_metrics(metrics: &RunMetrics) {
    println!("Run {} ({})", metrics.run_id, metrics.status);
    println!();
    println!("  Queued:          {}", metrics.documents_queued);
    println!("  Processed:       {}", metrics.documents_processed);
    println!("  Failed:          {}", metrics.documents_failed);
    println!("  Dead letter:     {}", metrics.documents_in_dead_letter);
    println!("  Elements:        {}", metrics.total_elements);
    println!(
        "  Workers:         {} active / {} seen",
        metrics.active_workers, metrics.peak_workers
    );
    println!("  Started:         {}", format_ts_relative(metrics.created_at));
    if metrics.throughput_docs_per_second > 0.0 {
        println!(
            "  Throughput:      {:.2} docs/s",
            metrics.throughput_docs_per_second
        );
    }
    println!();
}

pub fn print_history(buckets: &[HourlyMetrics]) {
    println!(
        "  {:<22} {:>7} {:>9} {:>7} {:>9}",
        "HOUR", "QUEUED", "COMPLETED", "FAILED", "AVG TIME"
    );
    println!("  {}", "-".repeat(60));
    for b in buckets {
        println!(
            "  {:<22} {:>7} {:>9} {:>7} {:>9}",
            b.hour,
            b.queued,
            b.completed,
            b.failed,
            format_duration(b.avg_processing_time)
        );
    }
    println!();
}

pub fn print_dead_letter(items: &[DeadLetterItem]) {
    if items.is_empty() {
        println!("Dead letter queue is empty.");
        return;
    }

    println!(
        "  {:>8} {:<18} {:<16} {:<28} {:<14} {}",
        "ID", "RUN", "SOURCE", "DOCUMENT", "MOVED", "ERROR"
    );
    println!("  {}", "-".repeat(110));
    for item in items {
        println!(
            "  {:>8} {:<18} {:<16} {:<28} {:<14} {}",
            item.queue_id,
            item.run_id,
            truncate(&item.source_name, 16),
            truncate(&item.doc_id, 28),
            format_ts_relative(item.dead_lettered_at),
            item.error_message.as_deref().unwrap_or("-")
        );
    }
    println!();
}

pub fn print_analysis(summary: &DeadLetterSummary, patterns: &[FailurePattern]) {
    println!("Dead letter analysis for run {}", summary.run_id);
    println!();
    println!("  Items:   {}", summary.total);
    if let (Some(oldest), Some(newest)) = (summary.oldest, summary.newest) {
        println!(
            "  Span:    {} .. {}",
            format_ts_relative(oldest),
            format_ts_relative(newest)
        );
    }
    for (source, count) in &summary.by_source {
        println!("    {:<24} {}", source, count);
    }

    if patterns.is_empty() {
        println!();
        return;
    }

    println!();
    println!("  {:<18} {:>6} {:>7}   {}", "ERROR TYPE", "COUNT", "SHARE", "EXAMPLE");
    println!("  {}", "-".repeat(76));
    for p in patterns {
        println!(
            "  {:<18} {:>6} {:>7}   {}",
            p.error_type,
            p.frequency,
            format_percent(p.percentage),
            p.representative_message.as_deref().unwrap_or("-")
        );
        println!("  {:<18} -> {}", "", p.recommendation);
    }
    println!();
}

/// Seconds as a short human duration ("850ms", "12.5s", "4m 10s", "2h 3m").
pub fn format_duration(secs: f64) -> String {
    if secs <= 0.0 {
        "-".to_string()
    } else if secs < 1.0 {
        format!("{}ms", (secs * 1000.0).round() as i64)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let s = secs as i64;
        format!("{}m {}s", s / 60, s % 60)
    } else {
        let s = secs as i64;
        format!("{}h {}m", s / 3600, (s % 3600) / 60)
    }
}

pub fn format_percent(pct: f64) -> String {
    format!("{:.1}%", pct)
}

/// Format an epoch-millisecond timestamp as a relative time ("3 hours ago").
pub fn format_ts_relative(ts_ms: i64) -> String {
    let delta = (now_millis() - ts_ms) / 1000;

    if delta < 0 {
        return format_ts_iso(ts_ms);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts_ms)
    }
}

fn format_ts_iso(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}
