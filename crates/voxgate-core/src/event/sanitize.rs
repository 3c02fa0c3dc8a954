//! Total sanitizer for producer-supplied event payloads.
//!
//! Provider adapters attach arbitrary `serde_json::Value` trees to
//! `custom_event` and tool payloads. Before those reach the wire they pass
//! through [`sanitize`], which guarantees the result serializes to bounded,
//! valid JSON:
//!
//! * traversal stops at [`MAX_SANITIZE_DEPTH`]; deeper subtrees are replaced
//!   with a `<truncated:…>` marker string,
//! * non-finite floats become strings (`serde_json` would render them as
//!   `null` or fail, depending on the producer),
//! * map key order is preserved as received.
//!
//! `serde_json::Value` is an owned tree, so reference cycles cannot be
//! constructed here; the depth cap is the operative bound for pathological
//! inputs. Producers with platform-native values (timestamps, UUIDs, raw
//! bytes) convert them to strings/base64 at event construction — see the
//! `Event` constructors.

use serde_json::{Map, Value};

/// Maximum nesting depth retained by the sanitizer.
pub const MAX_SANITIZE_DEPTH: usize = 20;

/// Sanitize an arbitrary JSON tree. Total: never fails, never panics.
pub fn sanitize(value: &Value) -> Value {
    sanitize_at(value, 0)
}

fn sanitize_at(value: &Value, depth: usize) -> Value {
    if depth >= MAX_SANITIZE_DEPTH {
        return Value::String(format!("<truncated:{}>", type_name(value)));
    }

    match value {
        Value::Number(n) => {
            // serde_json only stores finite f64s, but producers can smuggle
            // arbitrary precision through `Number::from_string_unchecked`
            // equivalents; re-render anything that is not representable.
            if n.is_f64() {
                match n.as_f64() {
                    Some(f) if f.is_finite() => value.clone(),
                    _ => Value::String(n.to_string()),
                }
            } else {
                value.clone()
            }
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_at(item, depth + 1))
                .collect(),
        ),
        Value::Object(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (key, item) in fields {
                out.insert(key.clone(), sanitize_at(item, depth + 1));
            }
            Value::Object(out)
        }
        Value::Null | Value::Bool(_) | Value::String(_) => value.clone(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
