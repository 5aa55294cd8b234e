//! Value comparison and conflict classification over JSON values
use std::collections::BTreeSet;

use serde_json::Value;

use super::types::{ConflictType, DetectOptions};

/// Structural equality. Object key order is irrelevant and numbers compare
/// by value, so `1` equals `1.0`. Integers compare exactly.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| deep_equal(x, y)))
        }
        _ => a == b,
    }
}

fn numbers_equal(x: &serde_json::Number, y: &serde_json::Number) -> bool {
    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
        return x == y;
    }
    if !x.is_f64() && !y.is_f64() {
        // one negative, one beyond i64
        return false;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Coarse type tag used for mismatch detection. Null, arrays and objects
/// all report "object".
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => "object",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
    }
}

/// Own keys of an object-like value; arrays expose their indices
fn keys(value: &Value) -> BTreeSet<String> {
    match value {
        Value::Object(map) => map.keys().cloned().collect(),
        Value::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        _ => BTreeSet::new(),
    }
}

/// Classify how `local` and `remote` disagree, or `None` when they are equal
pub fn classify(local: &Value, remote: &Value, options: &DetectOptions) -> Option<ConflictType> {
    if deep_equal(local, remote) {
        return None;
    }

    if let (Some(l), Some(r)) = (options.local_version, options.remote_version) {
        if l != r {
            return Some(ConflictType::VersionMismatch);
        }
    }
    if let (Some(l), Some(r)) = (options.local_timestamp, options.remote_timestamp) {
        if l != r {
            return Some(ConflictType::TimestampConflict);
        }
    }

    let local_type = type_name(local);
    if local_type != type_name(remote) {
        return Some(ConflictType::TypeMismatch);
    }
    if local_type == "object" && keys(local) != keys(remote) {
        return Some(ConflictType::StructureChange);
    }
    Some(ConflictType::ContentDivergence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equality_ignores_key_order_and_number_repr() {
        let a: Value = serde_json::from_str(r#"{"a": 1, "b": {"c": [1, 2.0]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b": {"c": [1.0, 2]}, "a": 1.0}"#).unwrap();
        assert!(deep_equal(&a, &b));
        assert!(!deep_equal(&json!([1, 2]), &json!([2, 1])));
        assert!(!deep_equal(&json!({"a": null}), &json!({})));
    }

    #[test]
    fn large_integers_compare_exactly() {
        let a = json!(9_007_199_254_740_993u64);
        let b = json!(9_007_199_254_740_992u64);
        assert!(!deep_equal(&a, &b));
        assert!(deep_equal(&a, &json!(9_007_199_254_740_993u64)));
        assert!(!deep_equal(&json!(u64::MAX), &json!(-1)));
        assert!(!deep_equal(&json!(i64::MIN), &json!(i64::MIN + 1)));
        assert!(deep_equal(&json!(3), &json!(3.0)));
    }

    #[test]
    fn classification_order() {
        let none = DetectOptions::default();
        assert_eq!(classify(&json!(1), &json!(1), &none), None);

        let versions = DetectOptions::default().versions(1, 2).timestamps(10, 20);
        assert_eq!(
            classify(&json!(1), &json!("1"), &versions),
            Some(ConflictType::VersionMismatch)
        );

        let timestamps = DetectOptions::default().versions(1, 1).timestamps(10, 20);
        assert_eq!(
            classify(&json!(1), &json!(2), &timestamps),
            Some(ConflictType::TimestampConflict)
        );

        assert_eq!(
            classify(&json!(1), &json!("1"), &none),
            Some(ConflictType::TypeMismatch)
        );
        // arrays and objects share a type name
        assert_eq!(
            classify(&json!({"a": 1}), &json!({"b": 1}), &none),
            Some(ConflictType::StructureChange)
        );
        assert_eq!(
            classify(&json!([1]), &json!([1, 2]), &none),
            Some(ConflictType::StructureChange)
        );
        assert_eq!(
            classify(&json!({"a": 1}), &json!({"a": 2}), &none),
            Some(ConflictType::ContentDivergence)
        );
        assert_eq!(
            classify(&json!("x"), &json!("y"), &none),
            Some(ConflictType::ContentDivergence)
        );
    }
}
