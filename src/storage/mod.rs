//! Persistence collaborator
//!
//! The versioning engine only needs get/put/query over three logical
//! tables (versions, snapshots with their blobs, history) plus one atomic
//! primitive, [`VaultStore::commit_version`]: insert the new ACTIVE
//! version and flip the previous head, succeeding only if that head is
//! still the branch's ACTIVE row.
//!
//! Two implementations share the same table logic:
//! - [`MemoryStore`]: everything in memory (tests, embedding)
//! - [`FileStore`]: tables rebuilt from an append-only journal on open,
//!   blobs as content-addressed files

mod blobs;
mod journal;
mod tables;

use std::collections::BTreeSet;
use std::path::Path;

use uuid::Uuid;

pub use blobs::{BlobBackend, DirBlobs, MemoryBlobs};
pub use journal::{Journal, JournalOp, NoJournal, OpSink};
pub use tables::{TableStore, Tables};

use crate::error::VaultResult;
use crate::history::{HistoryEntry, HistoryFilter};
use crate::snapshot::{Snapshot, SnapshotFilter, SnapshotStatus};
use crate::version::{Supersede, Version, VersionFilter, VersionStatus};

/// In-memory store
pub type MemoryStore = TableStore<NoJournal, MemoryBlobs>;

/// Journaled, file-backed store
pub type FileStore = TableStore<Journal, DirBlobs>;

impl MemoryStore {
    pub fn new() -> Self {
        TableStore::with_parts(Tables::default(), NoJournal, MemoryBlobs::default())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStore {
    /// Open (or create) a store rooted at `data_dir`
    ///
    /// Layout:
    /// - `<data_dir>/journal.log`: metadata journal
    /// - `<data_dir>/blobs/`: payload blobs named by hash
    /// - `<data_dir>/.lock`: held exclusively while the store is open
    pub fn open(data_dir: &Path) -> VaultResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let (journal, tables) = Journal::open(&data_dir.join("journal.log"))?;
        let blobs = DirBlobs::open(data_dir.join("blobs"))?;
        Ok(TableStore::with_parts(tables, journal, blobs))
    }
}

/// Storage contract required by the versioning engine
pub trait VaultStore: Send + Sync {
    // --- versions ---

    fn get_version(&self, version_id: &str) -> VaultResult<Option<Version>>;

    /// Matching versions ordered by (source, branch, version_number)
    fn query_versions(&self, filter: &VersionFilter) -> VaultResult<Vec<Version>>;

    /// Atomically insert `version` as ACTIVE and apply `supersede`
    ///
    /// Fails with `Conflict` when the superseded row is no longer the
    /// branch's ACTIVE version, when `supersede` is `None` but the branch
    /// already has an ACTIVE version, or when the version number is taken.
    fn commit_version(&self, version: &Version, supersede: Option<&Supersede>)
        -> VaultResult<()>;

    fn update_version_tags(&self, version_id: &str, tags: &BTreeSet<String>) -> VaultResult<()>;

    /// Set status to `to` iff it is currently `from`; returns whether it changed
    fn transition_version(
        &self,
        version_id: &str,
        from: VersionStatus,
        to: VersionStatus,
    ) -> VaultResult<bool>;

    // --- snapshots ---

    fn get_snapshot(&self, snapshot_id: &str) -> VaultResult<Option<Snapshot>>;

    /// Matching snapshots ordered by creation time
    fn query_snapshots(&self, filter: &SnapshotFilter) -> VaultResult<Vec<Snapshot>>;

    /// Insert the row together with its payload blob
    ///
    /// The blob is written under `snapshot.blob_key()` unless that key
    /// already exists. Happens atomically with respect to
    /// [`VaultStore::remove_snapshot`], so a shared blob is never deleted
    /// underneath a row that is being inserted.
    fn insert_snapshot(&self, snapshot: &Snapshot, blob: &[u8]) -> VaultResult<()>;

    fn set_snapshot_status(&self, snapshot_id: &str, status: SnapshotStatus) -> VaultResult<()>;

    /// Remove the row and, when no other row references it, its blob
    ///
    /// Returns `None` when the row did not exist, otherwise the bytes
    /// freed (0 when the blob is still shared).
    fn remove_snapshot(&self, snapshot_id: &str) -> VaultResult<Option<u64>>;

    // --- blobs ---

    fn get_blob(&self, key: &str) -> VaultResult<Option<Vec<u8>>>;

    // --- history ---

    fn append_history(&self, entry: &HistoryEntry) -> VaultResult<()>;

    /// Matching entries ordered oldest first
    fn query_history(&self, filter: &HistoryFilter) -> VaultResult<Vec<HistoryEntry>>;

    fn delete_history(&self, entry_ids: &[Uuid]) -> VaultResult<usize>;
}
