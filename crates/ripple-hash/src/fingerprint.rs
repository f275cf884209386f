//! Canonical serialization and the 128-bit BLAKE3 fingerprint primitive.
//!
//! Two values that differ only in object key order, integral float vs integer
//! representation, or the sign of zero serialize identically.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use crate::entity::TrackedEntity;
use crate::error::HashError;

/// Digest length in bytes; rendered as 32 hex characters.
pub const DIGEST_LEN: usize = 16;

/// Largest float magnitude whose integral values are all exactly representable.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Normalize a JSON value: sorted object keys, integral floats as integers,
/// `-0.0` as `0`.
#[must_use]
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(normalize_number(n)),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, normalize(v))).collect();
            let mut out = Map::with_capacity(sorted.len());
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn normalize_number(n: &Number) -> Number {
    if n.is_i64() || n.is_u64() {
        return n.clone();
    }
    match n.as_f64() {
        Some(f) if f == 0.0 => Number::from(0),
        Some(f) if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER => Number::from(f as i64),
        _ => n.clone(),
    }
}

/// Serialize a value canonically.
///
/// Keys are written in sorted order regardless of the map implementation
/// `serde_json` was built with.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(&normalize(value), &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
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
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hash a value's canonical serialization: first 16 bytes of BLAKE3, hex.
#[must_use]
pub fn canonical_hash(value: &Value) -> String {
    let digest = blake3::hash(canonical_json(value).as_bytes());
    hex::encode(&digest.as_bytes()[..DIGEST_LEN])
}

/// Attribute fingerprint of an entity.
///
/// Attribute names are sorted and deduplicated; absent attributes hash as null.
///
/// # Errors
///
/// `HashError::NoHashableAttributes` if the entity lists no attributes.
pub fn fingerprint(entity: &dyn TrackedEntity) -> Result<String, HashError> {
    let mut names = entity.hashable_attributes();
    if names.is_empty() {
        return Err(HashError::NoHashableAttributes {
            entity: entity.entity_ref(),
        });
    }
    names.sort();
    names.dedup();

    let mut attributes = Map::with_capacity(names.len());
    for name in names {
        let value = entity.attribute(&name).unwrap_or(Value::Null);
        attributes.insert(name, value);
    }
    Ok(canonical_hash(&Value::Object(attributes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEntity;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!({"b": 1, "a": 2}), json!({"a": 2, "b": 1}))]
    #[case(json!(1.0), json!(1))]
    #[case(json!(-0.0), json!(0))]
    #[case(json!({"n": {"z": 3.0, "y": [2.0, {"k": -0.0}]}}), json!({"n": {"y": [2, {"k": 0}], "z": 3}}))]
    fn equivalent_values_hash_equal(#[case] left: Value, #[case] right: Value) {
        assert_eq!(canonical_json(&left), canonical_json(&right));
        assert_eq!(canonical_hash(&left), canonical_hash(&right));
    }

    #[rstest]
    #[case(json!(1.5), json!(1))]
    #[case(json!("1"), json!(1))]
    #[case(json!([1, 2]), json!([2, 1]))]
    #[case(json!(null), json!({}))]
    fn distinct_values_hash_differently(#[case] left: Value, #[case] right: Value) {
        assert_ne!(canonical_hash(&left), canonical_hash(&right));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        assert_eq!(
            canonical_json(&json!({"b": [1.0, "x"], "a": null})),
            r#"{"a":null,"b":[1,"x"]}"#
        );
    }

    #[test]
    fn digest_is_32_lowercase_hex() {
        let hash = canonical_hash(&json!({"title": "Hello"}));
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn fingerprint_is_deterministic_and_order_insensitive() {
        let a = MemoryEntity::new("article", "1")
            .attr("title", "Hello")
            .attr("words", 120);
        let b = MemoryEntity::new("article", "1")
            .attr("words", 120.0)
            .attr("title", "Hello")
            .attr("title", "Hello");
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn fingerprint_treats_missing_as_null() {
        let declared = MemoryEntity::new("article", "1")
            .attr("title", Value::Null)
            .hashable(["title", "summary"]);
        let explicit = MemoryEntity::new("article", "1")
            .attr("title", Value::Null)
            .attr("summary", Value::Null);
        assert_eq!(fingerprint(&declared).unwrap(), fingerprint(&explicit).unwrap());
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let a = MemoryEntity::new("article", "1").attr("title", "Hello");
        let b = MemoryEntity::new("article", "1").attr("title", "Hello!");
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn fingerprint_requires_attributes() {
        let empty = MemoryEntity::new("article", "1");
        assert!(matches!(
            fingerprint(&empty),
            Err(HashError::NoHashableAttributes { .. })
        ));
    }
}
