//! Canonical serialization and hashing.
//!
//! Every hash and MAC in this crate is computed over the output of
//! [`to_canonical_bytes`]: compact JSON with object keys sorted at every
//! depth. Two components serializing the same value independently always
//! obtain identical bytes.
//!
//! serde_json maps non-finite floats to `null`, so callers must reject NaN
//! before encoding (see [`crate::types::DecisionRecord::check_bounds`]).

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Error types for canonical encoding.
#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    /// Value could not be represented as JSON
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Encode a value canonically.
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::with_capacity(256);
    write_value(&value, &mut out)?;
    Ok(out)
}

/// Encode a value canonically as a string.
pub fn to_canonical_string<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonicalError> {
    let bytes = to_canonical_bytes(value)?;
    // Only valid UTF-8 is ever written.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), CanonicalError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => {
            out.extend_from_slice(serde_json::to_string(s)?.as_bytes());
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(serde_json::to_string(key)?.as_bytes());
                out.push(b':');
                write_value(&map[key], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

/// Compute SHA256 hash of content.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Fingerprint of a raw input, used to bind a decision to what was reviewed.
pub fn fingerprint(input: &str) -> String {
    compute_hash(input.as_bytes())
}
