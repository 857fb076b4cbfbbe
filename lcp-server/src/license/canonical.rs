//! Deterministic JSON canonicalization and SHA-256 hashing.
//!
//! A license document is signed over its canonical form, so the canonical
//! bytes must be bit-for-bit reproducible: object members sorted
//! lexicographically by key at every level, no whitespace, no HTML escaping
//! of `<`/`>`/`&`, numbers carried through unchanged, no trailing newline.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonicalize a value into its deterministic JSON form.
///
/// Round-trips through `serde_json::Value` so member ordering is governed
/// here, not by the struct's field order.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    let mut out = String::new();
    write_value(&mut out, &value)?;
    Ok(out)
}

/// Append the canonical rendering of `value` to `out`.
fn write_value(out: &mut String, value: &Value) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(members) => {
            let mut keys: Vec<&str> = members.keys().map(String::as_str).collect();
            keys.sort_unstable();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_value(out, &members[*key])?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item)?;
            }
            out.push(']');
        }
        // Scalars keep serde_json's compact rendering, which never
        // HTML-escapes and never reformats numbers.
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

/// Raw SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of the canonicalized representation (hex-encoded).
pub fn hash_canonical<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = canonicalize(value)?;
    Ok(hex::encode(sha256(canonical.as_bytes())))
}
