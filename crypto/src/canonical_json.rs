//! Canonical JSON: object keys sorted, no insignificant whitespace.
//!
//! Signed payloads that are JSON (contract terms) are hashed over this form so
//! that every party computes the same hash regardless of serializer.

use serde_json::Value;
use taler_types::HashCode;

use crate::hash::hash_string;

pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[key], out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // serde_json's string escaping is already minimal and deterministic.
    out.push_str(&Value::String(s.to_owned()).to_string());
}

/// Hash of the canonical form of a JSON value.
pub fn hash_json(value: &Value) -> HashCode {
    hash_string(&canonicalize(value))
}
