//! Logical tables shared by every store

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use tracing::warn;
use uuid::Uuid;

use super::blobs::BlobBackend;
use super::journal::{JournalOp, OpSink};
use super::VaultStore;
use crate::error::{VaultError, VaultResult};
use crate::history::{HistoryEntry, HistoryFilter};
use crate::snapshot::{Snapshot, SnapshotFilter, SnapshotStatus};
use crate::version::{Supersede, Version, VersionFilter, VersionStatus};

/// Versions, snapshots and history rows
///
/// Mutation is split in two: [`Tables::validate`] rejects an op without
/// touching anything, [`Tables::apply`] performs a validated op and
/// cannot fail. Stores journal the op between the two.
#[derive(Debug, Default)]
pub struct Tables {
    versions: HashMap<String, Version>,
    snapshots: HashMap<String, Snapshot>,
    /// Snapshot ids in insertion order
    snapshot_order: Vec<String>,
    history: Vec<HistoryEntry>,
}

impl Tables {
    fn active_on(&self, source_id: &str, branch: &str) -> Option<&Version> {
        self.versions
            .values()
            .find(|v| v.source_id == source_id && v.branch == branch && v.is_active())
    }

    pub fn validate(&self, op: &JournalOp) -> VaultResult<()> {
        match op {
            JournalOp::CommitVersion { version, supersede } => {
                self.validate_commit(version, supersede.as_ref())
            }
            JournalOp::SetVersionTags { version_id, .. } => {
                if self.versions.contains_key(version_id) {
                    Ok(())
                } else {
                    Err(VaultError::not_found(format!("Version {}", version_id)))
                }
            }
            JournalOp::SetVersionStatus { version_id, from, .. } => {
                match self.versions.get(version_id) {
                    Some(v) if v.status == *from => Ok(()),
                    Some(v) => Err(VaultError::conflict(format!(
                        "Version {} is {}, expected {}",
                        version_id, v.status, from
                    ))),
                    None => Err(VaultError::not_found(format!("Version {}", version_id))),
                }
            }
            JournalOp::InsertSnapshot { snapshot } => {
                if self.snapshots.contains_key(&snapshot.snapshot_id) {
                    Err(VaultError::conflict(format!(
                        "Snapshot {} already exists",
                        snapshot.snapshot_id
                    )))
                } else {
                    Ok(())
                }
            }
            JournalOp::SetSnapshotStatus { snapshot_id, .. }
            | JournalOp::RemoveSnapshot { snapshot_id } => {
                if self.snapshots.contains_key(snapshot_id) {
                    Ok(())
                } else {
                    Err(VaultError::not_found(format!("Snapshot {}", snapshot_id)))
                }
            }
            JournalOp::AppendHistory { entry } => {
                if self.history.iter().any(|e| e.entry_id == entry.entry_id) {
                    Err(VaultError::conflict(format!(
                        "History entry {} already exists",
                        entry.entry_id
                    )))
                } else {
                    Ok(())
                }
            }
            JournalOp::DeleteHistory { .. } => Ok(()),
        }
    }

    fn validate_commit(&self, version: &Version, supersede: Option<&Supersede>) -> VaultResult<()> {
        if self.versions.contains_key(&version.version_id) {
            return Err(VaultError::conflict(format!(
                "Version {} already exists",
                version.version_id
            )));
        }
        if version.status != VersionStatus::Active {
            return Err(VaultError::validation("New versions must be ACTIVE"));
        }
        let taken = self.versions.values().any(|v| {
            v.source_id == version.source_id
                && v.branch == version.branch
                && v.version_number == version.version_number
        });
        if taken {
            return Err(VaultError::conflict(format!(
                "Version number {} already used on {}/{}",
                version.version_number, version.source_id, version.branch
            )));
        }

        let active = self.active_on(&version.source_id, &version.branch);
        match (active, supersede) {
            (None, None) => Ok(()),
            (Some(current), Some(s)) if current.version_id == s.version_id => {
                if s.status == VersionStatus::Active {
                    Err(VaultError::validation("Superseded version cannot stay ACTIVE"))
                } else {
                    Ok(())
                }
            }
            (Some(current), _) => Err(VaultError::conflict(format!(
                "Branch {}/{} head moved to {}",
                version.source_id, version.branch, current.version_id
            ))),
            (None, Some(s)) => Err(VaultError::conflict(format!(
                "Version {} is no longer ACTIVE",
                s.version_id
            ))),
        }
    }

    /// Apply a validated op
    pub fn apply(&mut self, op: JournalOp) {
        match op {
            JournalOp::CommitVersion { version, supersede } => {
                if let Some(s) = supersede {
                    if let Some(prev) = self.versions.get_mut(&s.version_id) {
                        prev.status = s.status;
                    }
                }
                self.versions.insert(version.version_id.clone(), version);
            }
            JournalOp::SetVersionTags { version_id, tags } => {
                if let Some(v) = self.versions.get_mut(&version_id) {
                    v.tags = tags;
                }
            }
            JournalOp::SetVersionStatus { version_id, to, .. } => {
                if let Some(v) = self.versions.get_mut(&version_id) {
                    v.status = to;
                }
            }
            JournalOp::InsertSnapshot { snapshot } => {
                self.snapshot_order.push(snapshot.snapshot_id.clone());
                self.snapshots.insert(snapshot.snapshot_id.clone(), snapshot);
            }
            JournalOp::SetSnapshotStatus {
                snapshot_id,
                status,
            } => {
                if let Some(s) = self.snapshots.get_mut(&snapshot_id) {
                    s.status = status;
                }
            }
            JournalOp::RemoveSnapshot { snapshot_id } => {
                self.snapshots.remove(&snapshot_id);
                self.snapshot_order.retain(|id| id != &snapshot_id);
            }
            JournalOp::AppendHistory { entry } => self.history.push(entry),
            JournalOp::DeleteHistory { entry_ids } => {
                let doomed: HashSet<Uuid> = entry_ids.into_iter().collect();
                self.history.retain(|e| !doomed.contains(&e.entry_id));
            }
        }
    }

    /// Whether any snapshot row still points at blob `key`
    pub fn blob_referenced(&self, key: &str) -> bool {
        self.snapshots.values().any(|s| s.blob_key() == key)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn query_versions(&self, filter: &VersionFilter) -> Vec<Version> {
        let mut found: Vec<Version> = self
            .versions
            .values()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            (&a.source_id, &a.branch, a.version_number).cmp(&(
                &b.source_id,
                &b.branch,
                b.version_number,
            ))
        });
        filter.paginate(found)
    }

    fn query_snapshots(&self, filter: &SnapshotFilter) -> Vec<Snapshot> {
        let mut found: Vec<Snapshot> = self
            .snapshot_order
            .iter()
            .filter_map(|id| self.snapshots.get(id))
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        // Stable: insertion order breaks ties
        found.sort_by_key(|s| s.created_at);
        filter.paginate(found)
    }

    fn query_history(&self, filter: &HistoryFilter) -> Vec<HistoryEntry> {
        let mut found: Vec<HistoryEntry> = self
            .history
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        found.sort_by_key(|e| e.timestamp);
        filter.paginate(found)
    }
}

struct Inner<S> {
    tables: Tables,
    sink: S,
}

/// Tables plus a journal sink behind one lock, and a blob backend
///
/// Validation, journaling and applying happen under the same write lock,
/// which makes [`VaultStore::commit_version`] a compare-and-swap on the
/// branch head.
pub struct TableStore<S: OpSink, B: BlobBackend> {
    inner: RwLock<Inner<S>>,
    blobs: B,
}

impl<S: OpSink, B: BlobBackend> TableStore<S, B> {
    pub fn with_parts(tables: Tables, sink: S, blobs: B) -> Self {
        Self {
            inner: RwLock::new(Inner { tables, sink }),
            blobs,
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> VaultResult<T> {
        let inner = self.inner.read().map_err(|_| VaultError::poisoned())?;
        Ok(f(&inner.tables))
    }

    /// Payload blobs, for inspection and repair tooling
    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    fn execute(&self, op: JournalOp) -> VaultResult<()> {
        let mut inner = self.inner.write().map_err(|_| VaultError::poisoned())?;
        Self::execute_locked(&mut inner, op)
    }

    fn execute_locked(inner: &mut Inner<S>, op: JournalOp) -> VaultResult<()> {
        inner.tables.validate(&op)?;
        inner.sink.record(&op)?;
        inner.tables.apply(op);
        Ok(())
    }
}

impl<S: OpSink, B: BlobBackend> VaultStore for TableStore<S, B> {
    fn get_version(&self, version_id: &str) -> VaultResult<Option<Version>> {
        self.read(|t| t.versions.get(version_id).cloned())
    }

    fn query_versions(&self, filter: &VersionFilter) -> VaultResult<Vec<Version>> {
        self.read(|t| t.query_versions(filter))
    }

    fn commit_version(&self, version: &Version, supersede: Option<&Supersede>) -> VaultResult<()> {
        self.execute(JournalOp::CommitVersion {
            version: version.clone(),
            supersede: supersede.cloned(),
        })
    }

    fn update_version_tags(&self, version_id: &str, tags: &BTreeSet<String>) -> VaultResult<()> {
        self.execute(JournalOp::SetVersionTags {
            version_id: version_id.to_string(),
            tags: tags.clone(),
        })
    }

    fn transition_version(
        &self,
        version_id: &str,
        from: VersionStatus,
        to: VersionStatus,
    ) -> VaultResult<bool> {
        let op = JournalOp::SetVersionStatus {
            version_id: version_id.to_string(),
            from,
            to,
        };
        match self.execute(op) {
            Ok(()) => Ok(true),
            Err(VaultError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn get_snapshot(&self, snapshot_id: &str) -> VaultResult<Option<Snapshot>> {
        self.read(|t| t.snapshots.get(snapshot_id).cloned())
    }

    fn query_snapshots(&self, filter: &SnapshotFilter) -> VaultResult<Vec<Snapshot>> {
        self.read(|t| t.query_snapshots(filter))
    }

    fn insert_snapshot(&self, snapshot: &Snapshot, blob: &[u8]) -> VaultResult<()> {
        let mut inner = self.inner.write().map_err(|_| VaultError::poisoned())?;
        let op = JournalOp::InsertSnapshot {
            snapshot: snapshot.clone(),
        };
        inner.tables.validate(&op)?;

        let key = snapshot.blob_key();
        let fresh = self.blobs.write(&key, blob)?;
        if let Err(e) = Self::execute_locked(&mut inner, op) {
            if fresh && !inner.tables.blob_referenced(&key) {
                // An orphan would only be reused by a later identical payload
                if let Err(cleanup) = self.blobs.delete(&key) {
                    warn!(event = "BLOB_ORPHANED", key = %key, error = %cleanup, "Could not remove blob of rejected snapshot");
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn set_snapshot_status(&self, snapshot_id: &str, status: SnapshotStatus) -> VaultResult<()> {
        self.execute(JournalOp::SetSnapshotStatus {
            snapshot_id: snapshot_id.to_string(),
            status,
        })
    }

    fn remove_snapshot(&self, snapshot_id: &str) -> VaultResult<Option<u64>> {
        let mut inner = self.inner.write().map_err(|_| VaultError::poisoned())?;
        let snapshot = match inner.tables.snapshots.get(snapshot_id) {
            Some(s) => s.clone(),
            None => return Ok(None),
        };
        Self::execute_locked(
            &mut inner,
            JournalOp::RemoveSnapshot {
                snapshot_id: snapshot_id.to_string(),
            },
        )?;

        let key = snapshot.blob_key();
        if inner.tables.blob_referenced(&key) {
            return Ok(Some(0));
        }
        // The row is gone either way; a blob left behind is only wasted space
        match self.blobs.delete(&key) {
            Ok(true) => Ok(Some(snapshot.compressed_size)),
            Ok(false) => Ok(Some(0)),
            Err(e) => {
                warn!(event = "BLOB_ORPHANED", key = %key, error = %e, "Could not remove unreferenced blob");
                Ok(Some(0))
            }
        }
    }

    fn get_blob(&self, key: &str) -> VaultResult<Option<Vec<u8>>> {
        self.blobs.read(key)
    }

    fn append_history(&self, entry: &HistoryEntry) -> VaultResult<()> {
        self.execute(JournalOp::AppendHistory {
            entry: entry.clone(),
        })
    }

    fn query_history(&self, filter: &HistoryFilter) -> VaultResult<Vec<HistoryEntry>> {
        self.read(|t| t.query_history(filter))
    }

    fn delete_history(&self, entry_ids: &[Uuid]) -> VaultResult<usize> {
        if entry_ids.is_empty() {
            return Ok(0);
        }
        let before = self.read(|t| t.history.len())?;
        self.execute(JournalOp::DeleteHistory {
            entry_ids: entry_ids.to_vec(),
        })?;
        let after = self.read(|t| t.history.len())?;
        Ok(before.saturating_sub(after))
    }
}
