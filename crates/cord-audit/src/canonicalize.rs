//! # Canonical JSON for Entry Hashing
//!
//! Hashing a journal entry requires that semantically identical entries
//! produce identical byte sequences. Serde's default object serialization
//! does not promise key order, and number formatting varies by path, so
//! entries are canonicalized before hashing.
//!
//! ## Rules (after RFC 8785)
//!
//! 1. Object keys sorted lexicographically
//! 2. No insignificant whitespace
//! 3. Strings with JSON-minimal escaping
//! 4. Integers without a fractional part; other numbers in their shortest
//!    round-trip form
//!
//! The full RFC 8785 number algorithm (ECMAScript `ToString`) is not
//! reproduced; audit entries only ever contain integers, simple decimal
//! scores and strings, and Rust's shortest-round-trip float formatting is
//! stable for those.
//!
//! ## References
//!
//! - **RFC 8785** - "JSON Canonicalization Scheme (JCS)"
//!   <https://www.rfc-editor.org/rfc/rfc8785>

use sha2::{Digest, Sha256};

/// Canonicalize a JSON value to a deterministic string.
///
/// # Example
///
/// ```rust
/// use cord_audit::canonicalize::canonicalize;
/// use serde_json::json;
///
/// let a = canonicalize(&json!({"b": 1, "a": 2}));
/// let b = canonicalize(&json!({"a": 2, "b": 1}));
/// assert_eq!(a, b);
/// assert_eq!(a, r#"{"a":2,"b":1}"#);
/// ```
pub fn canonicalize(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Hex SHA-256 of `prefix || canonical_json(value)`.
///
/// This is the entry-hash primitive: `prefix` carries the previous hash so
/// that every entry commits to its predecessor.
pub fn hash_with_prefix(prefix: &str, value: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(canonicalize(value).as_bytes());
    hex::encode(hasher.finalize())
}

fn write_value(out: &mut String, value: &serde_json::Value) {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        serde_json::Value::Number(n) => write_number(out, n),
        serde_json::Value::String(s) => {
            // serde_json string serialization is already minimal-escape.
            out.push_str(&serde_json::to_string(s).expect("string serialization cannot fail"));
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(
                    &serde_json::to_string(key).expect("string serialization cannot fail"),
                );
                out.push(':');
                write_value(out, &map[key.as_str()]);
            }
            out.push('}');
        }
    }
}

fn write_number(out: &mut String, n: &serde_json::Number) {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
    } else if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f.abs() < 9e15 {
            // A whole-valued float renders as an integer so that 7 and
            // 7.0 hash identically.
            out.push_str(&(f as i64).to_string());
        } else {
            out.push_str(&f.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_is_deterministic() {
        let a = json!({"zulu": 1, "alpha": [3, 2, 1], "bravo": "x"});
        assert_eq!(canonicalize(&a), r#"{"alpha":[3,2,1],"bravo":"x","zulu":1}"#);
    }

    #[test]
    fn test_semantically_equal_objects_hash_equal() {
        let a = json!({"b": 1.0, "a": "s"});
        let b = json!({"a": "s", "b": 1});
        assert_eq!(
            hash_with_prefix("GENESIS", &a),
            hash_with_prefix("GENESIS", &b)
        );
    }

    #[test]
    fn test_prefix_changes_hash() {
        let v = json!({"a": 1});
        assert_ne!(hash_with_prefix("x", &v), hash_with_prefix("y", &v));
    }

    #[test]
    fn test_whole_float_renders_as_integer() {
        assert_eq!(canonicalize(&json!(7.0)), "7");
        assert_eq!(canonicalize(&json!(7.5)), "7.5");
    }

    #[test]
    fn test_nested_structures() {
        let v = json!({"outer": {"b": [true, null], "a": {"k": "v"}}});
        assert_eq!(
            canonicalize(&v),
            r#"{"outer":{"a":{"k":"v"},"b":[true,null]}}"#
        );
    }

    #[test]
    fn test_string_escaping() {
        let v = json!({"s": "line\nbreak \"quoted\""});
        assert_eq!(canonicalize(&v), r#"{"s":"line\nbreak \"quoted\""}"#);
    }
}
