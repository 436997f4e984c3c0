//! Canonical JSON encoding for content addressing.
//!
//! Every id in the system is the digest of bytes produced here, so the
//! encoding is fixed:
//! - object keys sorted by byte comparison, at every depth
//! - no insignificant whitespace
//! - strings escaped exactly as `serde_json` escapes them
//! - numbers in `serde_json`'s shortest round-trip form
//!
//! Key ordering is done here rather than relying on the `serde_json` map
//! type, whose ordering changes with the `preserve_order` feature.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Encode any serializable value to canonical bytes
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(encode_value(&value))
}

/// Encode an already-built JSON value to canonical bytes
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(out, key);
                out.push(b':');
                write_value(out, item);
            }
            out.push(b'}');
        }
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    // Serializing a str cannot fail
    let escaped = Value::String(s.to_owned()).to_string();
    out.extend_from_slice(escaped.as_bytes());
}
