//! Structural hashing of field definitions.

use std::collections::BTreeMap;

use blake3::Hasher;
use serde_json::Value;

/// Compact JSON with object keys sorted at every depth.
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> =
                map.iter().map(|(k, v)| (k, to_canonical_json(v))).collect();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                .collect();
            format!("{{{}}}", items.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

/// blake3 hex digest of the canonical JSON of `value`.
pub fn definition_hash(value: &Value) -> String {
    let mut hasher = Hasher::new();
    hasher.update(to_canonical_json(value).as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"z": [{"y": "yes"}, null], "a": {"x": 10, "b": true}});
        assert_eq!(
            to_canonical_json(&value),
            r#"{"a":{"b":true,"x":10},"z":[{"y":"yes"},null]}"#
        );
    }

    #[test]
    fn test_hash_ignores_key_order_but_not_values() {
        let a = json!({"template": "cape_base", "level": 18000});
        let b = json!({"level": 18000, "template": "cape_base"});
        let c = json!({"level": 25500, "template": "cape_base"});

        assert_eq!(definition_hash(&a), definition_hash(&b));
        assert_ne!(definition_hash(&a), definition_hash(&c));
        assert_eq!(definition_hash(&a).len(), 64);
    }
}
