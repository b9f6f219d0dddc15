//! Failure classification for dead-lettered documents.
//!
//! Groups quarantined items into coarse error categories so an operator can
//! see at a glance whether a run is suffering from one systemic problem
//! (every PDF failing to parse) or a long tail of one-offs.
//!
//! Classification order:
//!
//! 1. An explicit `error_type` in the item's [`ErrorDetails`] wins.
//! 2. Otherwise the first [`ErrorCategory`] whose keywords appear in the
//!    lower-cased error message.
//! 3. Otherwise [`ErrorCategory::Unknown`].

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::models::ErrorDetails;

/// Maximum number of queue ids kept as samples per pattern.
pub const MAX_SAMPLES: usize = 5;

/// Built-in error categories, checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Parse,
    Permission,
    Timeout,
    NotFound,
    Network,
    Resource,
    Encoding,
    Validation,
    Unknown,
}

impl ErrorCategory {
    const MATCHED: [ErrorCategory; 8] = [
        ErrorCategory::Parse,
        ErrorCategory::Permission,
        ErrorCategory::Timeout,
        ErrorCategory::NotFound,
        ErrorCategory::Network,
        ErrorCategory::Resource,
        ErrorCategory::Encoding,
        ErrorCategory::Validation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ErrorCategory::Parse => "ParseError",
            ErrorCategory::Permission => "PermissionError",
            ErrorCategory::Timeout => "TimeoutError",
            ErrorCategory::NotFound => "NotFoundError",
            ErrorCategory::Network => "NetworkError",
            ErrorCategory::Resource => "ResourceError",
            ErrorCategory::Encoding => "EncodingError",
            ErrorCategory::Validation => "ValidationError",
            ErrorCategory::Unknown => "UnknownError",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            ErrorCategory::Parse => &["parse", "syntax", "malformed", "corrupt", "unexpected token"],
            ErrorCategory::Permission => &[
                "permission",
                "access denied",
                "forbidden",
                "unauthorized",
                "401",
                "403",
            ],
            ErrorCategory::Timeout => &["timeout", "timed out", "deadline"],
            ErrorCategory::NotFound => &["not found", "404", "no such file", "does not exist"],
            ErrorCategory::Network => &[
                "connection",
                "network",
                "refused",
                "unreachable",
                "dns",
                "reset by peer",
            ],
            ErrorCategory::Resource => &["out of memory", "memory", "disk full", "quota", "too large"],
            ErrorCategory::Encoding => &["encoding", "utf-8", "utf8", "decode", "charset"],
            ErrorCategory::Validation => &["invalid", "validation", "schema", "missing field"],
            ErrorCategory::Unknown => &[],
        }
    }

    fn recommendation(&self) -> &'static str {
        match self {
            ErrorCategory::Parse => "Inspect sample documents; the parser may not support this format or the files are corrupt.",
            ErrorCategory::Permission => "Check credentials and access rights for the affected content sources.",
            ErrorCategory::Timeout => "Raise parser or connector timeouts, or split very large documents.",
            ErrorCategory::NotFound => "Documents were removed or moved at the source; consider dropping them from the run.",
            ErrorCategory::Network => "Verify connectivity to the source; these are usually safe to retry once it recovers.",
            ErrorCategory::Resource => "Increase worker memory/disk limits or exclude oversized documents.",
            ErrorCategory::Encoding => "Normalize source encoding or configure a fallback charset.",
            ErrorCategory::Validation => "Fix the source data or relax validation rules for the affected source.",
            ErrorCategory::Unknown => "Review the representative message and sample items manually.",
        }
    }

    fn from_message(message: &str) -> ErrorCategory {
        let lower = message.to_lowercase();
        ErrorCategory::MATCHED
            .into_iter()
            .find(|category| category.keywords().iter().any(|kw| lower.contains(kw)))
            .unwrap_or(ErrorCategory::Unknown)
    }
}

/// The inputs the classifier needs from one dead-lettered item.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub queue_id: i64,
    pub source_name: String,
    pub error_message: Option<String>,
    pub error_details: Option<ErrorDetails>,
}

/// A cluster of dead-letter items sharing an error type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailurePattern {
    pub error_type: String,
    pub frequency: usize,
    /// Share of all analysed items, 0–100.
    pub percentage: f64,
    pub representative_message: Option<String>,
    pub sample_queue_ids: Vec<i64>,
    pub affected_sources: Vec<String>,
    pub recommendation: String,
}

/// Derive the coarse error type for one failure.
pub fn classify(error_message: Option<&str>, error_details: Option<&ErrorDetails>) -> String {
    if let Some(explicit) = error_details
        .and_then(|d| d.error_type.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return explicit.to_string();
    }
    error_message
        .map(ErrorCategory::from_message)
        .unwrap_or(ErrorCategory::Unknown)
        .name()
        .to_string()
}

fn recommendation_for(error_type: &str) -> &'static str {
    ErrorCategory::MATCHED
        .into_iter()
        .find(|c| c.name() == error_type)
        .unwrap_or(ErrorCategory::Unknown)
        .recommendation()
}

struct Bucket {
    frequency: usize,
    representative_message: Option<String>,
    sample_queue_ids: Vec<i64>,
    sources: BTreeSet<String>,
}

/// Group records into patterns ordered by frequency (descending), then by
/// error type name. The first record seen in a group supplies its
/// representative message, so pass records newest-first to surface the
/// most recent wording.
pub fn group_failures(records: &[FailureRecord]) -> Vec<FailurePattern> {
    let mut buckets: HashMap<String, Bucket> = HashMap::new();

    for record in records {
        let error_type = classify(record.error_message.as_deref(), record.error_details.as_ref());
        let bucket = buckets.entry(error_type).or_insert_with(|| Bucket {
            frequency: 0,
            representative_message: None,
            sample_queue_ids: Vec::new(),
            sources: BTreeSet::new(),
        });
        bucket.frequency += 1;
        if bucket.representative_message.is_none() {
            bucket.representative_message = record.error_message.clone();
        }
        if bucket.sample_queue_ids.len() < MAX_SAMPLES {
            bucket.sample_queue_ids.push(record.queue_id);
        }
        bucket.sources.insert(record.source_name.clone());
    }

    let total = records.len();
    let mut patterns: Vec<FailurePattern> = buckets
        .into_iter()
        .map(|(error_type, bucket)| FailurePattern {
            recommendation: recommendation_for(&error_type).to_string(),
            percentage: if total > 0 {
                bucket.frequency as f64 * 100.0 / total as f64
            } else {
                0.0
            },
            error_type,
            frequency: bucket.frequency,
            representative_message: bucket.representative_message,
            sample_queue_ids: bucket.sample_queue_ids,
            affected_sources: bucket.sources.into_iter().collect(),
        })
        .collect();

    patterns.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| a.error_type.cmp(&b.error_type))
    });
    patterns
}
