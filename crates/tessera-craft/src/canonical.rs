//! Canonical JSON encoding and content digests.
//!
//! Every byte sequence that gets hashed or signed goes through
//! [`to_canonical_bytes`]: object keys sorted by code point, no
//! insignificant whitespace. Two logically identical values therefore
//! always produce the same digest.

use std::fmt::Write;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize `value` to canonical JSON bytes.
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    let mut out = String::new();
    write_canonical(&value, &mut out);
    Ok(out.into_bytes())
}

/// Render a JSON value canonically.
#[must_use]
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            // Display on a scalar `Value` is its compact JSON encoding.
            let _ = write!(out, "{value}");
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
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

/// SHA-256 hex digest of a byte slice.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256 hex digest of the canonical JSON encoding of `value`.
pub fn canonical_sha256<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(&to_canonical_bytes(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn primitives() {
        assert_eq!(canonical_string(&json!(null)), "null");
        assert_eq!(canonical_string(&json!(true)), "true");
        assert_eq!(canonical_string(&json!(123)), "123");
        assert_eq!(canonical_string(&json!("a\"b")), r#""a\"b""#);
    }

    #[test]
    fn object_keys_are_sorted() {
        let val = json!({ "b": 2, "a": 1 });
        assert_eq!(canonical_string(&val), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn nested_values() {
        let val = json!({ "z": [ { "y": "yes" }, null ], "a": { "x": 10 } });
        assert_eq!(
            canonical_string(&val),
            r#"{"a":{"x":10},"z":[{"y":"yes"},null]}"#
        );
    }

    #[test]
    fn sha256_known_value() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_ignores_insertion_order() {
        let mut a = serde_json::Map::new();
        a.insert("one".to_owned(), json!(1));
        a.insert("two".to_owned(), json!(2));
        let mut b = serde_json::Map::new();
        b.insert("two".to_owned(), json!(2));
        b.insert("one".to_owned(), json!(1));

        assert_eq!(
            canonical_sha256(&Value::Object(a)).unwrap(),
            canonical_sha256(&Value::Object(b)).unwrap()
        );
    }
}
