//! Diff Engine Property Tests
//!
//! - Diffing a collection against itself finds no changes
//! - Applying a patch turns the source into the target exactly
//! - Anomaly heuristics fire on the documented thresholds

use recordvault::diff::{AnomalyKind, AnomalyThresholds, ChangeType, DiffEngine, DiffOptions};
use recordvault::record::records_from_value;
use recordvault::Record;
use serde_json::{json, Value};
use std::collections::BTreeSet;

fn records(value: Value) -> Vec<Record> {
    records_from_value(value).unwrap()
}

fn fixtures() -> Vec<Vec<Record>> {
    vec![
        records(json!([])),
        records(json!([{"id": 1, "title": "a"}])),
        records(json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b", "tags": ["x"]}])),
        records(json!([{"id": 2, "title": "B", "tags": ["x", "y"]}, {"id": 3, "title": "c"}])),
        records(json!([{"id": 3, "title": 3}, {"id": 1, "title": null}, {"id": 4, "meta": {"k": "v"}}])),
        records(json!([{"id": "s-1", "n": 1.5}, {"id": "s-2", "n": 2}])),
    ]
}

#[test]
fn test_self_diff_is_empty() {
    let engine = DiffEngine::default();
    for data in fixtures() {
        let diff = engine.compute_diff(&data, &data, "id", &BTreeSet::new());
        assert!(diff.added.is_empty());
        assert!(diff.deleted.is_empty());
        assert!(diff.modified.is_empty());
        assert_eq!(diff.unchanged.len(), data.len());
        assert_eq!(diff.change_rate(), 0.0);
    }
}

#[test]
fn test_patch_round_trip_across_fixtures() {
    let engine = DiffEngine::default();
    let all = fixtures();
    for source in &all {
        for target in &all {
            let patch = engine.create_patch(source, target, "id");
            assert_eq!(&engine.apply_patch(source, &patch).unwrap(), target);
        }
    }
}

#[test]
fn test_field_classification() {
    let engine = DiffEngine::default();
    let source = records(json!([{"id": 1, "a": null, "b": "x", "c": 1, "d": "same", "e": "gone"}]));
    let target = records(json!([{"id": 1, "a": "set", "b": "y", "c": "1", "d": "same", "e": null}]));

    let diff = engine.compute_diff(&source, &target, "id", &BTreeSet::new());
    assert_eq!(diff.modified.len(), 1);
    let kinds: Vec<(String, ChangeType)> = diff.modified[0]
        .field_changes
        .iter()
        .map(|c| (c.field_name.clone(), c.change_type))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("a".to_string(), ChangeType::Added),
            ("b".to_string(), ChangeType::Modified),
            ("c".to_string(), ChangeType::TypeChanged),
            ("e".to_string(), ChangeType::Deleted),
        ]
    );
}

#[test]
fn test_options_ignore_fields_and_case() {
    let engine = DiffEngine::default();
    let source = records(json!([{"sku": "A", "title": "Shoe", "seen_at": 1}]));
    let target = records(json!([{"sku": "A", "title": "SHOE", "seen_at": 2}]));

    let strict = engine.compute_diff_with(&source, &target, &DiffOptions::keyed_by("sku"));
    assert_eq!(strict.modified.len(), 1);

    let relaxed = engine.compute_diff_with(
        &source,
        &target,
        &DiffOptions::keyed_by("sku").ignoring(["seen_at"]).case_insensitive(),
    );
    assert!(!relaxed.has_changes());
}

#[test]
fn test_anomalies_on_mass_deletion() {
    let engine = DiffEngine::default();
    let rows: Vec<Value> = (0..10).map(|i| json!({"id": i, "price": i})).collect();
    let source = records(json!(rows));
    let target: Vec<Record> = source.iter().take(4).cloned().collect();

    let diff = engine.compute_diff(&source, &target, "id", &BTreeSet::new());
    let anomalies = engine.detect_anomalies(&diff, &AnomalyThresholds::default());
    let kinds: Vec<AnomalyKind> = anomalies.iter().map(|a| a.kind).collect();
    assert!(kinds.contains(&AnomalyKind::HighChangeRate));
    assert!(kinds.contains(&AnomalyKind::MassDeletion));
}

#[test]
fn test_anomalies_on_single_field_churn() {
    let engine = DiffEngine::default();
    let source = records(json!([
        {"id": 1, "price": 1, "title": "a"},
        {"id": 2, "price": 2, "title": "b"},
        {"id": 3, "price": 3, "title": "c"},
        {"id": 4, "price": 4, "title": "d"},
        {"id": 5, "price": 5, "title": "e"}
    ]));
    let target = records(json!([
        {"id": 1, "price": 10, "title": "a"},
        {"id": 2, "price": 2, "title": "b"},
        {"id": 3, "price": 3, "title": "c"},
        {"id": 4, "price": 4, "title": "d"},
        {"id": 5, "price": 5, "title": "e"}
    ]));

    let diff = engine.compute_diff(&source, &target, "id", &BTreeSet::new());
    let anomalies = engine.detect_anomalies(&diff, &AnomalyThresholds::default());
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].kind, AnomalyKind::FieldConcentration);
    assert_eq!(anomalies[0].field.as_deref(), Some("price"));
}
