//! Result key derivation.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// `generateResultKey(packId, inputs)`: canonicalize inputs (object keys
/// sorted ascending, `null`s kept, arrays preserve order, recursive),
/// concatenate with a NUL separator, SHA-256, first 16 lowercase hex chars.
pub fn generate_result_key(pack_id: &str, inputs: &Value) -> String {
    let canonical = canonicalize(inputs);
    let mut hasher = Sha256::new();
    hasher.update(pack_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}

/// Recursively produce a JSON string with object keys sorted ascending.
/// `serde_json::Value::Object` is already a `BTreeMap`-backed map when the
/// `preserve_order` feature is off, but we sort explicitly so behavior does
/// not depend on that feature flag being absent downstream.
fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap_or_default(), canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_is_16_hex_chars() {
        let key = generate_result_key("pack1", &json!({"a": 1}));
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_insensitive_to_object_key_order() {
        let a = generate_result_key("pack1", &json!({"a": 1, "b": 2}));
        let b = generate_result_key("pack1", &json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn key_sensitive_to_array_order() {
        let a = generate_result_key("pack1", &json!({"items": [1, 2]}));
        let b = generate_result_key("pack1", &json!({"items": [2, 1]}));
        assert_ne!(a, b);
    }

    #[test]
    fn key_sensitive_to_pack_id() {
        let a = generate_result_key("pack1", &json!({"a": 1}));
        let b = generate_result_key("pack2", &json!({"a": 1}));
        assert_ne!(a, b);
    }
}
