//! Patches and deltas
//!
//! A [`Patch`] is the full, reviewable description of how one collection
//! becomes another (old and new values of modified records included). A
//! [`Delta`] is the compact form persisted in incremental and
//! differential snapshots: only what is needed to replay forward.
//!
//! Replay order: drop deleted ids, overwrite modified ids in place,
//! append added records. When the target order differs from that natural
//! order, the explicit target order is carried and applied last, so
//! `apply(source, create_patch(source, target)) == target` holds exactly.
//! Records are identified by occurrence key, so repeated keys (including
//! identical keyless rows) survive the round trip.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::engine::{compare_records, FieldChange, KeyedRecords};
use crate::record::{occurrence_keys, record_key, Record};

/// A record present on both sides with different content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedRecord {
    pub id: String,
    pub old: Record,
    pub new: Record,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSummary {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
}

impl PatchSummary {
    pub fn total(&self) -> usize {
        self.added + self.modified + self.deleted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub key_field: String,
    pub added: Vec<Record>,
    pub modified: Vec<ModifiedRecord>,
    /// Ids of removed records
    pub deleted: Vec<String>,
    /// Target ordering, present only when replay order would differ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<String>>,
    pub summary: PatchSummary,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.summary.total() == 0 && self.order.is_none()
    }
}

/// Forward-only delta persisted in snapshot payloads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub key_field: String,
    #[serde(default)]
    pub added: Vec<Record>,
    #[serde(default)]
    pub deleted: Vec<String>,
    /// New content of modified records
    #[serde(default)]
    pub modified: Vec<Record>,
    /// Occurrence keys of `modified`, position for position
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modified_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<String>>,
}

impl From<&Patch> for Delta {
    fn from(patch: &Patch) -> Self {
        Self {
            key_field: patch.key_field.clone(),
            added: patch.added.clone(),
            deleted: patch.deleted.clone(),
            modified: patch.modified.iter().map(|m| m.new.clone()).collect(),
            modified_ids: patch.modified.iter().map(|m| m.id.clone()).collect(),
            order: patch.order.clone(),
        }
    }
}

impl Delta {
    pub fn change_count(&self) -> usize {
        self.added.len() + self.deleted.len() + self.modified.len()
    }

    /// Identity of the i-th modified record; falls back to its plain key
    fn modified_id(&self, i: usize) -> String {
        match self.modified_ids.get(i) {
            Some(id) => id.clone(),
            None => record_key(&self.modified[i], &self.key_field),
        }
    }
}

pub(crate) fn create_patch(source: &[Record], target: &[Record], key_field: &str) -> Patch {
    let source_index = KeyedRecords::build(source, key_field);
    let target_index = KeyedRecords::build(target, key_field);
    let no_ignore = BTreeSet::new();

    let mut added = Vec::new();
    let mut modified = Vec::new();
    let mut deleted = Vec::new();

    for key in &source_index.order {
        let old = source_index.by_key[key];
        match target_index.by_key.get(key) {
            None => deleted.push(key.clone()),
            Some(new) if *new != old => modified.push(ModifiedRecord {
                id: key.clone(),
                old: old.clone(),
                new: (*new).clone(),
                changes: compare_records(old, new, &no_ignore, true),
            }),
            Some(_) => {}
        }
    }

    for key in &target_index.order {
        if !source_index.contains(key) {
            added.push(target_index.by_key[key].clone());
        }
    }

    // Order a plain replay would produce
    let deleted_set: HashSet<&String> = deleted.iter().collect();
    let natural: Vec<&String> = source_index
        .order
        .iter()
        .filter(|k| !deleted_set.contains(k))
        .chain(
            target_index
                .order
                .iter()
                .filter(|k| !source_index.contains(k)),
        )
        .collect();
    let wanted = target_index.order.clone();
    let order = if natural.len() == wanted.len() && natural.iter().zip(&wanted).all(|(a, b)| *a == b)
    {
        None
    } else {
        Some(wanted)
    };

    let summary = PatchSummary {
        added: added.len(),
        modified: modified.len(),
        deleted: deleted.len(),
    };

    Patch {
        key_field: key_field.to_string(),
        added,
        modified,
        deleted,
        order,
        summary,
    }
}

/// Replay a delta on top of `data`
///
/// Deleting an id that is not present is a no-op; a modified id that is
/// not present is inserted. Both indicate the delta was built against a
/// different base, which hash verification at the end of a chain restore
/// will catch.
pub fn apply_delta(data: &[Record], delta: &Delta) -> Vec<Record> {
    let key_field = delta.key_field.as_str();
    let deleted: HashSet<&str> = delta.deleted.iter().map(String::as_str).collect();
    let mut modified: HashMap<String, &Record> = delta
        .modified
        .iter()
        .enumerate()
        .map(|(i, r)| (delta.modified_id(i), r))
        .collect();

    let mut out = Vec::with_capacity(data.len() + delta.added.len());
    for (record, key) in data.iter().zip(occurrence_keys(data, key_field)) {
        if deleted.contains(key.as_str()) {
            continue;
        }
        match modified.remove(&key) {
            Some(new) => out.push(new.clone()),
            None => out.push(record.clone()),
        }
    }

    // Upserts, in delta order
    for (i, record) in delta.modified.iter().enumerate() {
        if modified.remove(&delta.modified_id(i)).is_some() {
            out.push(record.clone());
        }
    }

    out.extend(delta.added.iter().cloned());

    match &delta.order {
        Some(order) => reorder(out, order, key_field),
        None => out,
    }
}

fn reorder(records: Vec<Record>, order: &[String], key_field: &str) -> Vec<Record> {
    let keys = occurrence_keys(&records, key_field);
    let mut by_key: HashMap<String, Record> = keys.into_iter().zip(records).collect();

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        if let Some(record) = by_key.remove(key) {
            out.push(record);
        }
    }

    // Anything the order did not mention keeps a stable position at the end
    let mut rest: Vec<(String, Record)> = by_key.into_iter().collect();
    rest.sort_by(|a, b| a.0.cmp(&b.0));
    out.extend(rest.into_iter().map(|(_, record)| record));
    out
}
