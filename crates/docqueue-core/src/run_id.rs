//! Deterministic run identity.
//!
//! A run id is a pure function of the parts of the pipeline configuration
//! that change what gets produced. Two submissions with the same content
//! sources, storage backend, embedding settings, and relationship
//! detection settings land on the same run, so a re-submitted or resumed
//! pipeline picks up the existing queue instead of starting over.
//!
//! # Algorithm
//!
//! 1. Take the top-level sections listed in [`RUN_AFFECTING_SECTIONS`]
//!    (missing sections become `null`); ignore everything else,
//!    including `logging`.
//! 2. Serialize to canonical JSON: object keys sorted recursively, no
//!    whitespace. Array order is kept.
//! 3. SHA-256 the bytes and keep the first [`RUN_ID_LEN`] hex characters.
//!
//! ```rust
//! use docqueue_core::run_id::run_id_from_config;
//! use serde_json::json;
//!
//! let a = json!({"storage": {"kind": "sqlite", "path": "x"}, "logging": {"level": "debug"}});
//! let b = json!({"logging": {"level": "warn"}, "storage": {"path": "x", "kind": "sqlite"}});
//! assert_eq!(run_id_from_config(&a), run_id_from_config(&b));
//! assert_eq!(run_id_from_config(&a).len(), 16);
//! ```

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Top-level configuration sections that affect processing output.
pub const RUN_AFFECTING_SECTIONS: [&str; 4] = [
    "content_sources",
    "storage",
    "embedding",
    "relationship_detection",
];

/// Number of hex characters in a run id.
pub const RUN_ID_LEN: usize = 16;

/// Derive the run id for a pipeline configuration.
///
/// Never mutates `config`. Non-object configurations are treated as
/// having none of the run-affecting sections.
pub fn run_id_from_config(config: &Value) -> String {
    let canonical = canonical_json(&run_affecting_subset(config));

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..RUN_ID_LEN].to_string()
}

/// The run-affecting sections of `config`, always with every key present.
pub fn run_affecting_subset(config: &Value) -> Value {
    let mut subset = Map::new();
    for section in RUN_AFFECTING_SECTIONS {
        let value = config.get(section).cloned().unwrap_or(Value::Null);
        subset.insert(section.to_string(), value);
    }
    Value::Object(subset)
}

/// Serialize with sorted keys and no whitespace, independent of how the
/// map was built or whether `serde_json` preserves insertion order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Value::String serialization handles escaping.
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
