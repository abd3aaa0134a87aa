//! Cache Key Module
//!
//! Derives deterministic cache keys from an operation name and its variables.

use serde_json::{Map, Value};

/// Separator between the operation name and the serialized variables.
pub const KEY_SEPARATOR: char = ':';

// == Key Derivation ==
/// Builds the cache key for `operation` called with `variables`.
///
/// Object members are sorted recursively before serialization, so two
/// logically identical requests map to the same key whatever the member
/// order. Null or empty variables yield the bare operation name.
pub fn cache_key(operation: &str, variables: &Value) -> String {
    if is_empty_variables(variables) {
        return operation.to_string();
    }

    format!(
        "{}{}{}",
        operation,
        KEY_SEPARATOR,
        canonicalize(variables)
    )
}

/// Operation-name segment of a derived key.
pub fn operation_of(key: &str) -> &str {
    key.split_once(KEY_SEPARATOR)
        .map(|(operation, _)| operation)
        .unwrap_or(key)
}

fn is_empty_variables(variables: &Value) -> bool {
    match variables {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Serializes `value` with object members in lexicographic order.
pub fn canonicalize(value: &Value) -> String {
    sorted(value).to_string()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            let mut out = Map::new();
            for (key, nested) in entries {
                out.insert(key.clone(), sorted(nested));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}
