//! Canonicalization and content hashing
//!
//! Every fingerprint and change comparison rests on one deterministic byte
//! form per record: volatile ingestion fields stripped, object keys sorted,
//! string whitespace collapsed. Two payloads carrying the same logical
//! content must always produce the same digest regardless of field order or
//! whitespace in the wire form.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Top-level fields that change per download run and must not affect the
/// content digest.
const VOLATILE_FIELDS: [&str; 7] = [
    "downloaded_at",
    "updated_at",
    "created_at",
    "id",
    "internal_id",
    "_id",
    "source_id",
];

/// Compute the canonical SHA-256 digest (hex) of a record payload.
pub fn content_hash(payload: &Value) -> String {
    let canonical = canonicalize(payload);
    let mut hasher = Sha256::new();
    write_canonical(&canonical, &mut hasher);
    hex::encode(hasher.finalize())
}

/// Combined digest over a set of record hashes, order-independent.
///
/// Used as the snapshot-level `records_hash`: the member hashes are sorted
/// before being folded in, so listing order never affects the aggregate.
pub fn combined_hash<I, S>(hashes: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut sorted: Vec<String> = hashes.into_iter().map(|h| h.as_ref().to_string()).collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for h in &sorted {
        hasher.update(h.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Produce the canonical value: volatile top-level fields removed, nested
/// keys sorted, strings whitespace-collapsed.
pub fn canonicalize(payload: &Value) -> Value {
    match payload {
        Value::Object(map) => {
            let mut out = Map::new();
            let mut keys: Vec<&String> = map
                .keys()
                .filter(|k| !VOLATILE_FIELDS.contains(&k.as_str()))
                .collect();
            keys.sort();
            for key in keys {
                out.insert(key.clone(), canonicalize_nested(&map[key]));
            }
            Value::Object(out)
        }
        other => canonicalize_nested(other),
    }
}

/// Below the top level every field is significant; only ordering and
/// whitespace are normalized.
fn canonicalize_nested(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                out.insert(key.clone(), canonicalize_nested(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize_nested).collect()),
        Value::String(s) => Value::String(collapse_whitespace(s)),
        other => other.clone(),
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Serialize the canonical value with compact separators into the hasher.
///
/// serde_json preserves Map insertion order, so sorted insertion above makes
/// `to_string` deterministic already; writing through the hasher avoids an
/// intermediate allocation for large payloads.
fn write_canonical(value: &Value, hasher: &mut Sha256) {
    // Canonical values are serializable by construction.
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hasher.update(&bytes);
}
