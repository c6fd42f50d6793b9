//! Canonical Content Hashing
//!
//! Deterministic hashing for structured fact sets. Semantically equivalent
//! values produce the same digest regardless of key insertion order.
//!
//! Used for `requirements_hash` and its snapshots (`room_eval_hash`,
//! `offer_hash`): equality of a snapshot with the current hash means the
//! result computed from it is still valid.

use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

/// SHA256 of canonicalized JSON (sorted keys, compact output)
pub fn canonical_json_hash(value: &JsonValue) -> [u8; 32] {
    let canonical = canonicalize_json(value);
    sha256(canonical.to_string().as_bytes())
}

/// Hex digest of canonicalized JSON, the form stored on the record
pub fn canonical_json_hex(value: &JsonValue) -> String {
    hash_to_hex(&canonical_json_hash(value))
}

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Normalize JSON for deterministic hashing
///
/// - Object keys are sorted (recursive)
/// - Arrays keep their order
/// - Primitives unchanged; `null` is kept, never dropped
pub fn canonicalize_json(v: &JsonValue) -> JsonValue {
    match v {
        JsonValue::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();

            let mut sorted = serde_json::Map::new();
            for k in keys {
                if let Some(child) = map.get(k) {
                    sorted.insert(k.clone(), canonicalize_json(child));
                }
            }
            JsonValue::Object(sorted)
        }
        JsonValue::Array(arr) => JsonValue::Array(arr.iter().map(canonicalize_json).collect()),
        other => other.clone(),
    }
}

pub fn hash_to_hex(hash: &[u8; 32]) -> String {
    hex::encode(hash)
}

/// A stored hash is usable for comparison if it is present and non-blank.
///
/// Anything else is treated as "unknown", which callers must read as
/// "needs re-evaluation".
pub fn usable_hash(hash: Option<&str>) -> Option<&str> {
    hash.map(str::trim).filter(|h| !h.is_empty())
}

/// Hash guard: true only when both hashes are usable and identical.
/// Missing or blank values never match.
pub fn hashes_match(current: Option<&str>, snapshot: Option<&str>) -> bool {
    match (usable_hash(current), usable_hash(snapshot)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
