//! Record collections and their canonical form
//!
//! A dataset is a list of flat key/value maps. `serde_json::Map` is backed
//! by a `BTreeMap`, so serializing a record always emits keys in sorted
//! order, including nested objects. That serialization is the canonical
//! byte form used for hashing and for persisted blobs.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{VaultError, VaultResult};

/// A single record
pub type Record = Map<String, Value>;

/// Canonical (key-sorted) serialization of a record collection
pub fn canonical_bytes(records: &[Record]) -> VaultResult<Vec<u8>> {
    serde_json::to_vec(records).map_err(VaultError::from)
}

/// Parse a canonical record array
pub fn parse_records(bytes: &[u8]) -> VaultResult<Vec<Record>> {
    serde_json::from_slice(bytes)
        .map_err(|e| VaultError::integrity(format!("Payload is not a record array: {}", e)))
}

/// Hex SHA-256 of arbitrary bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash of a record collection over its canonical form
pub fn data_hash(records: &[Record]) -> VaultResult<String> {
    Ok(sha256_hex(&canonical_bytes(records)?))
}

/// Convert loosely-typed JSON into a record collection
///
/// Accepts an array of objects; anything else is a validation error.
pub fn records_from_value(value: Value) -> VaultResult<Vec<Record>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(map),
                other => Err(VaultError::validation(format!(
                    "Record {} is not an object: {}",
                    i, other
                ))),
            })
            .collect(),
        other => Err(VaultError::validation(format!(
            "Expected an array of records, got {}",
            type_name(&other)
        ))),
    }
}

/// Runtime type name of a value; integers and floats are distinct types
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Identity of a record inside a collection
///
/// Strings are used bare, other key values are JSON-encoded. Records
/// without the key field (or with a null key) fall back to a hash of
/// their full canonical content.
pub fn record_key(record: &Record, key_field: &str) -> String {
    match record.get(key_field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => fallback_key(record),
        Some(other) => other.to_string(),
    }
}

fn fallback_key(record: &Record) -> String {
    // Serializing a Map cannot fail
    let bytes = serde_json::to_vec(record).unwrap_or_default();
    format!("sha256:{}", sha256_hex(&bytes))
}

/// Per-position identities for a whole collection
///
/// The first record with a key gets the bare [`record_key`]; the n-th
/// repeat of that key becomes `key#n` (n starting at 2). Two identical
/// keyless rows therefore stay two records. Identities are unique within
/// the returned vector.
pub fn occurrence_keys(records: &[Record], key_field: &str) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
    let mut repeats: HashMap<String, usize> = HashMap::new();
    let mut keys = Vec::with_capacity(records.len());

    for record in records {
        let base = record_key(record, key_field);
        let key = if seen.contains(&base) {
            let n = repeats.entry(base.clone()).or_insert(1);
            loop {
                *n += 1;
                let candidate = format!("{}#{}", base, n);
                if !seen.contains(&candidate) {
                    break candidate;
                }
            }
        } else {
            base
        };
        seen.insert(key.clone());
        keys.push(key);
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_canonical_bytes_sort_keys() {
        let a = rec(json!({"b": 1, "a": {"z": 1, "y": 2}}));
        let bytes = canonical_bytes(&[a]).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"[{"a":{"y":2,"z":1},"b":1}]"#
        );
    }

    #[test]
    fn test_hash_independent_of_insertion_order() {
        let mut first = Record::new();
        first.insert("title".into(), json!("a"));
        first.insert("id".into(), json!(1));
        let mut second = Record::new();
        second.insert("id".into(), json!(1));
        second.insert("title".into(), json!("a"));
        assert_eq!(data_hash(&[first]).unwrap(), data_hash(&[second]).unwrap());
    }

    #[test]
    fn test_record_key_variants() {
        assert_eq!(record_key(&rec(json!({"id": "abc"})), "id"), "abc");
        assert_eq!(record_key(&rec(json!({"id": 7})), "id"), "7");
        let missing = record_key(&rec(json!({"title": "x"})), "id");
        assert!(missing.starts_with("sha256:"));
        let null_key = record_key(&rec(json!({"id": null, "title": "x"})), "id");
        assert!(null_key.starts_with("sha256:"));
    }

    #[test]
    fn test_occurrence_keys_number_repeats() {
        let data = vec![
            rec(json!({"id": 1, "t": "a"})),
            rec(json!({"id": 1, "t": "b"})),
            rec(json!({"id": 2})),
            rec(json!({"id": 1, "t": "c"})),
        ];
        assert_eq!(occurrence_keys(&data, "id"), vec!["1", "1#2", "2", "1#3"]);

        let keyless = vec![rec(json!({"title": "x"})), rec(json!({"title": "x"}))];
        let keys = occurrence_keys(&keyless, "id");
        assert_eq!(keys[1], format!("{}#2", keys[0]));
    }

    #[test]
    fn test_occurrence_keys_skip_literal_collisions() {
        let data = vec![
            rec(json!({"id": "a#2"})),
            rec(json!({"id": "a"})),
            rec(json!({"id": "a"})),
        ];
        let keys = occurrence_keys(&data, "id");
        assert_eq!(keys, vec!["a#2", "a", "a#3"]);
    }

    #[test]
    fn test_records_from_value_rejects_scalars() {
        assert!(records_from_value(json!([{"id": 1}, 3])).is_err());
        assert!(records_from_value(json!({"id": 1})).is_err());
        assert_eq!(records_from_value(json!([{"id": 1}])).unwrap().len(), 1);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(type_name(&json!(1)), "int");
        assert_eq!(type_name(&json!(1.5)), "float");
        assert_eq!(type_name(&json!("s")), "string");
        assert_eq!(type_name(&json!([1])), "list");
    }
}
