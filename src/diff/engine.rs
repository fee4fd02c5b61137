//! Record-level and field-level comparison

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::anomaly::{detect_anomalies, Anomaly, AnomalyThresholds};
use super::patch::{self, Delta, Patch};
use crate::error::VaultResult;
use crate::record::{occurrence_keys, type_name, Record};

/// Classification of a record or field change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    /// Was null or absent, now set
    Added,
    /// Was set, now null or absent
    Deleted,
    /// Same runtime type, different value
    Modified,
    /// Both set, different runtime type
    TypeChanged,
    Unchanged,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Added => "ADDED",
            ChangeType::Deleted => "DELETED",
            ChangeType::Modified => "MODIFIED",
            ChangeType::TypeChanged => "TYPE_CHANGED",
            ChangeType::Unchanged => "UNCHANGED",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A change to one field of one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field_name: String,
    pub change_type: ChangeType,
    pub old_value: Value,
    pub new_value: Value,
}

/// A change to one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordChange {
    pub record_id: String,
    pub change_type: ChangeType,
    /// Non-unchanged field changes; empty for added, deleted and unchanged records
    #[serde(default)]
    pub field_changes: Vec<FieldChange>,
}

/// Result of comparing two record collections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub source_version_id: Option<String>,
    pub target_version_id: Option<String>,
    pub added: Vec<RecordChange>,
    pub deleted: Vec<RecordChange>,
    pub modified: Vec<RecordChange>,
    pub unchanged: Vec<RecordChange>,
    pub source_count: usize,
    pub target_count: usize,
}

/// Counts-only view of a diff
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: usize,
    pub deleted: usize,
    pub modified: usize,
    pub unchanged: usize,
    pub source_count: usize,
    pub target_count: usize,
    pub change_rate: f64,
}

impl DiffResult {
    pub fn with_versions(
        mut self,
        source_version_id: impl Into<String>,
        target_version_id: impl Into<String>,
    ) -> Self {
        self.source_version_id = Some(source_version_id.into());
        self.target_version_id = Some(target_version_id.into());
        self
    }

    pub fn total_changes(&self) -> usize {
        self.added.len() + self.deleted.len() + self.modified.len()
    }

    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }

    /// Changed records over the larger of the two collections (0 when both are empty)
    pub fn change_rate(&self) -> f64 {
        let denominator = self.source_count.max(self.target_count);
        if denominator == 0 {
            return 0.0;
        }
        self.total_changes() as f64 / denominator as f64
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            added: self.added.len(),
            deleted: self.deleted.len(),
            modified: self.modified.len(),
            unchanged: self.unchanged.len(),
            source_count: self.source_count,
            target_count: self.target_count,
            change_rate: self.change_rate(),
        }
    }

    /// Number of field-level changes per field name across modified records
    pub fn field_change_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for change in &self.modified {
            for field in &change.field_changes {
                *counts.entry(field.field_name.clone()).or_insert(0) += 1;
            }
        }
        counts
    }
}

/// Collection indexed by occurrence key, in collection order
///
/// Repeated keys are matched positionally: the second `id=1` on one side
/// pairs with the second `id=1` on the other.
pub(crate) struct KeyedRecords<'a> {
    pub order: Vec<String>,
    pub by_key: HashMap<String, &'a Record>,
}

impl<'a> KeyedRecords<'a> {
    pub fn build(records: &'a [Record], key_field: &str) -> Self {
        let order = occurrence_keys(records, key_field);
        let by_key = order.iter().cloned().zip(records.iter()).collect();
        Self { order, by_key }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }
}

/// Structural equality
///
/// Maps and lists compare recursively. Strings honour `case_sensitive`.
/// Integers and floats with the same numeric value are equal here; the
/// type check happens before this is called.
pub fn values_equal(a: &Value, b: &Value, case_sensitive: bool) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => {
            if case_sensitive {
                x == y
            } else {
                x.to_lowercase() == y.to_lowercase()
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .zip(y.iter())
                    .all(|(l, r)| values_equal(l, r, case_sensitive))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    y.get(k)
                        .map_or(false, |w| values_equal(v, w, case_sensitive))
                })
        }
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(l), Some(r)) => l == r,
            _ => match (x.as_u64(), y.as_u64()) {
                (Some(l), Some(r)) => l == r,
                _ => x.as_f64() == y.as_f64(),
            },
        },
        _ => a == b,
    }
}

fn classify_field(old: &Value, new: &Value, case_sensitive: bool) -> ChangeType {
    match (old.is_null(), new.is_null()) {
        (true, true) => ChangeType::Unchanged,
        (true, false) => ChangeType::Added,
        (false, true) => ChangeType::Deleted,
        (false, false) => {
            if type_name(old) != type_name(new) {
                ChangeType::TypeChanged
            } else if values_equal(old, new, case_sensitive) {
                ChangeType::Unchanged
            } else {
                ChangeType::Modified
            }
        }
    }
}

/// Field changes between two versions of a record, unchanged fields omitted
pub(crate) fn compare_records(
    old: &Record,
    new: &Record,
    ignore_fields: &BTreeSet<String>,
    case_sensitive: bool,
) -> Vec<FieldChange> {
    let fields: BTreeSet<&String> = old
        .keys()
        .chain(new.keys())
        .filter(|name| !ignore_fields.contains(*name))
        .collect();

    let mut changes = Vec::new();
    for name in fields {
        let old_value = old.get(name).unwrap_or(&Value::Null);
        let new_value = new.get(name).unwrap_or(&Value::Null);
        let change_type = classify_field(old_value, new_value, case_sensitive);
        if change_type != ChangeType::Unchanged {
            changes.push(FieldChange {
                field_name: name.clone(),
                change_type,
                old_value: old_value.clone(),
                new_value: new_value.clone(),
            });
        }
    }
    changes
}

/// Per-call comparison settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOptions {
    pub key_field: String,
    #[serde(default)]
    pub ignore_fields: BTreeSet<String>,
    pub case_sensitive: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            key_field: "id".to_string(),
            ignore_fields: BTreeSet::new(),
            case_sensitive: true,
        }
    }
}

impl DiffOptions {
    pub fn keyed_by(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            ..Default::default()
        }
    }

    pub fn ignoring<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }
}

/// Stateless comparison engine
#[derive(Debug, Clone)]
pub struct DiffEngine {
    case_sensitive: bool,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DiffEngine {
    pub fn new(case_sensitive: bool) -> Self {
        Self { case_sensitive }
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Compare two collections keyed by `key_field`
    ///
    /// Output order: added follows the target, everything else follows
    /// the source.
    pub fn compute_diff(
        &self,
        source: &[Record],
        target: &[Record],
        key_field: &str,
        ignore_fields: &BTreeSet<String>,
    ) -> DiffResult {
        let source_index = KeyedRecords::build(source, key_field);
        let target_index = KeyedRecords::build(target, key_field);

        let mut result = DiffResult {
            source_count: source.len(),
            target_count: target.len(),
            ..Default::default()
        };

        for key in &source_index.order {
            let old = source_index.by_key[key];
            match target_index.by_key.get(key) {
                None => result.deleted.push(RecordChange {
                    record_id: key.clone(),
                    change_type: ChangeType::Deleted,
                    field_changes: Vec::new(),
                }),
                Some(new) => {
                    let field_changes =
                        compare_records(old, new, ignore_fields, self.case_sensitive);
                    if field_changes.is_empty() {
                        result.unchanged.push(RecordChange {
                            record_id: key.clone(),
                            change_type: ChangeType::Unchanged,
                            field_changes,
                        });
                    } else {
                        result.modified.push(RecordChange {
                            record_id: key.clone(),
                            change_type: ChangeType::Modified,
                            field_changes,
                        });
                    }
                }
            }
        }

        for key in &target_index.order {
            if !source_index.contains(key) {
                result.added.push(RecordChange {
                    record_id: key.clone(),
                    change_type: ChangeType::Added,
                    field_changes: Vec::new(),
                });
            }
        }

        result
    }

    /// [`DiffEngine::compute_diff`] with per-call options overriding the engine's case mode
    pub fn compute_diff_with(
        &self,
        source: &[Record],
        target: &[Record],
        options: &DiffOptions,
    ) -> DiffResult {
        DiffEngine::new(options.case_sensitive).compute_diff(
            source,
            target,
            &options.key_field,
            &options.ignore_fields,
        )
    }

    /// Build a patch that turns `source` into `target`
    pub fn create_patch(&self, source: &[Record], target: &[Record], key_field: &str) -> Patch {
        patch::create_patch(source, target, key_field)
    }

    /// Apply a patch produced by [`DiffEngine::create_patch`]
    pub fn apply_patch(&self, data: &[Record], patch: &Patch) -> VaultResult<Vec<Record>> {
        Ok(patch::apply_delta(data, &Delta::from(patch)))
    }

    pub fn detect_anomalies(
        &self,
        diff: &DiffResult,
        thresholds: &AnomalyThresholds,
    ) -> Vec<Anomaly> {
        detect_anomalies(diff, thresholds)
    }
}
