//! Hashing System - SHA-256 for Documents and Batches
//!
//! Provides deterministic, reproducible hashes so an issued document can be
//! matched to its verification record and a replayed batch can be recognised.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let sorted_map: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            Value::Object(sorted_map)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Digest stored alongside a verification record.
pub fn document_digest(document: &[u8]) -> String {
    sha256_hex(document)
}

#[derive(Serialize)]
struct BatchIdentity<'a> {
    prefix: &'a str,
    date: String,
    emails: Vec<&'a str>,
}

/// Fingerprint of everything that determines the identifiers of a batch.
/// batch_fingerprint = sha256(canonical {prefix, date, ordered emails})
pub fn batch_fingerprint<'a>(
    prefix: &'a str,
    date: NaiveDate,
    emails: impl IntoIterator<Item = &'a str>,
) -> Result<String, serde_json::Error> {
    let identity = BatchIdentity {
        prefix,
        date: date.format("%Y-%m-%d").to_string(),
        emails: emails.into_iter().collect(),
    };
    Ok(sha256_hex(canonical_json(&identity)?.as_bytes()))
}
