//! Value level merge strategies
use serde_json::{Map, Value};

use super::detect::deep_equal;

/// Recursive merge. Objects take the union of keys and merge shared keys,
/// arrays become a duplicate-free union, anything else takes `remote`.
pub fn merge_deep(local: &Value, remote: &Value) -> Value {
    match (local, remote) {
        (Value::Object(l), Value::Object(r)) => {
            let mut merged = l.clone();
            for (key, remote_value) in r {
                let value = match l.get(key) {
                    Some(local_value) => merge_deep(local_value, remote_value),
                    None => remote_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        (Value::Array(l), Value::Array(r)) => {
            let mut merged: Vec<Value> = Vec::with_capacity(l.len() + r.len());
            for item in l.iter().chain(r) {
                if !merged.iter().any(|existing| deep_equal(existing, item)) {
                    merged.push(item.clone());
                }
            }
            Value::Array(merged)
        }
        _ => remote.clone(),
    }
}

/// One level of object spread, remote keys override
pub fn merge_shallow(local: &Value, remote: &Value) -> Value {
    match (local, remote) {
        (Value::Object(l), Value::Object(r)) => {
            let mut merged = l.clone();
            merged.extend(r.iter().map(|(k, v)| (k.clone(), v.clone())));
            Value::Object(merged)
        }
        _ => remote.clone(),
    }
}

/// Zero value of the same kind as `value`
pub fn fallback_default(value: &Value) -> Value {
    match value {
        Value::String(_) => Value::String(String::new()),
        Value::Number(_) => Value::from(0),
        Value::Bool(_) => Value::Bool(false),
        Value::Array(_) => Value::Array(Vec::new()),
        Value::Object(_) => Value::Object(Map::new()),
        Value::Null => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_nested_objects() {
        let local = json!({"a": 1, "b": {"x": 1}});
        let remote = json!({"b": {"y": 2}, "c": 3});
        assert_eq!(
            merge_deep(&local, &remote),
            json!({"a": 1, "b": {"x": 1, "y": 2}, "c": 3})
        );
    }

    #[test]
    fn deep_merge_arrays_and_scalars() {
        assert_eq!(
            merge_deep(&json!([1, {"k": 1}, 2]), &json!([2, 3, {"k": 1}])),
            json!([1, {"k": 1}, 2, 3])
        );
        assert_eq!(merge_deep(&json!({"a": 1}), &json!({"a": 2})), json!({"a": 2}));
        assert_eq!(merge_deep(&json!([1]), &json!("x")), json!("x"));
    }

    #[test]
    fn shallow_merge_replaces_nested() {
        let local = json!({"a": 1, "b": {"x": 1}});
        let remote = json!({"b": {"y": 2}});
        assert_eq!(merge_shallow(&local, &remote), json!({"a": 1, "b": {"y": 2}}));
    }

    #[test]
    fn zero_values() {
        assert_eq!(fallback_default(&json!("abc")), json!(""));
        assert_eq!(fallback_default(&json!(4.5)), json!(0));
        assert_eq!(fallback_default(&json!(true)), json!(false));
        assert_eq!(fallback_default(&json!([1])), json!([]));
        assert_eq!(fallback_default(&json!({"a": 1})), json!({}));
        assert_eq!(fallback_default(&Value::Null), Value::Null);
    }
}
