//! Snapshot persistence for record collections
//!
//! A snapshot is the stored payload behind one version:
//! - FULL: the complete canonical record array
//! - INCREMENTAL: a delta against the previous snapshot
//! - DIFFERENTIAL: a delta against the last FULL snapshot
//!
//! Payload blobs are content-addressed by the hash of the uncompressed
//! payload, so re-persisting identical bytes is a no-op and a retried
//! creation never duplicates storage.
//!
//! # Retention
//!
//! Snapshots expire `retention_days` after creation. An expired snapshot
//! is only removed when nothing live still replays on top of it and it
//! does not back an ACTIVE version; otherwise it is marked EXPIRED and kept.

mod chain;
mod codec;
mod types;

pub use codec::Payload;
pub use types::{
    CleanupReport, Compression, Snapshot, SnapshotFilter, SnapshotId, SnapshotOptions,
    SnapshotStats, SnapshotStatus, SnapshotType, StorageSavings,
};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::MetadataCache;
use crate::config::VaultConfig;
use crate::diff::{apply_delta, Delta, DiffEngine};
use crate::error::{VaultError, VaultResult};
use crate::history::{Actor, HistoryAction, HistoryTracker, NewEntry};
use crate::record::{canonical_bytes, data_hash, Record};
use crate::storage::VaultStore;
use crate::version::{VersionFilter, VersionStatus};

/// Result of [`SnapshotManager::verify_snapshot`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotCheck {
    pub snapshot_id: SnapshotId,
    /// Chain ids, oldest first (empty when the chain could not be resolved)
    pub chain: Vec<SnapshotId>,
    pub valid: bool,
    pub record_count: Option<u64>,
    pub error: Option<String>,
}

pub struct SnapshotManager {
    store: Arc<dyn VaultStore>,
    history: Arc<HistoryTracker>,
    cache: Arc<MetadataCache>,
    diff: DiffEngine,
    max_chain_hops: usize,
    compression_threshold: usize,
}

impl SnapshotManager {
    pub fn new(
        store: Arc<dyn VaultStore>,
        history: Arc<HistoryTracker>,
        cache: Arc<MetadataCache>,
        config: &VaultConfig,
    ) -> Self {
        Self {
            store,
            history,
            cache,
            diff: DiffEngine::new(config.case_sensitive_diff),
            max_chain_hops: config.max_chain_hops,
            compression_threshold: config.compression_threshold_bytes,
        }
    }

    pub fn max_chain_hops(&self) -> usize {
        self.max_chain_hops
    }

    // ------------------------------------------------------------------
    // creation
    // ------------------------------------------------------------------

    /// Persist `records` as the snapshot of `version_id`
    ///
    /// A delta type with no usable predecessor is stored FULL instead.
    pub fn create_snapshot(
        &self,
        source_id: &str,
        version_id: &str,
        records: &[Record],
        snapshot_type: SnapshotType,
        options: &SnapshotOptions,
        actor: &Actor,
    ) -> VaultResult<Snapshot> {
        let result = self.persist(source_id, version_id, records, snapshot_type, options);

        let mut entry = NewEntry::new(source_id, HistoryAction::Snapshot, actor)
            .with_version(version_id)
            .with_affected_records(records.len() as u64)
            .with_detail("requested_type", snapshot_type.as_str());
        if let Ok(ref snapshot) = result {
            entry = entry
                .with_detail("snapshot_id", snapshot.snapshot_id.as_str())
                .with_detail("type", snapshot.snapshot_type.as_str())
                .with_detail("compressed_size", snapshot.compressed_size);
        }
        self.history.record_outcome(entry, result)
    }

    /// Create without writing history; the caller records its own entry
    pub(crate) fn persist(
        &self,
        source_id: &str,
        version_id: &str,
        records: &[Record],
        requested: SnapshotType,
        options: &SnapshotOptions,
    ) -> VaultResult<Snapshot> {
        if source_id.trim().is_empty() || version_id.trim().is_empty() {
            return Err(VaultError::validation("source_id and version_id are required"));
        }
        if options.retention_days == 0 {
            return Err(VaultError::validation("retention_days must be > 0"));
        }

        let full_bytes = canonical_bytes(records)?;
        let dataset_size = full_bytes.len() as u64;
        let records_hash = data_hash(records)?;

        let predecessor = match requested {
            SnapshotType::Full => None,
            _ => self.resolve_predecessor(source_id, requested, options)?,
        };

        let delta = match predecessor {
            Some(pred) => self
                .delta_from(&pred, records, &options.key_field, &records_hash)?
                .map(|delta| (pred, delta)),
            None => None,
        };

        let (snapshot_type, raw, parent, base, depth) = match delta {
            None => (SnapshotType::Full, full_bytes, None, None, 0),
            Some((pred, delta)) if requested == SnapshotType::Differential => {
                let raw = Payload::Delta(delta).to_bytes()?;
                (requested, raw, None, Some(pred.snapshot_id), 1)
            }
            Some((pred, delta)) => {
                let raw = Payload::Delta(delta).to_bytes()?;
                let depth = pred.chain_depth + 1;
                (requested, raw, Some(pred.snapshot_id), None, depth)
            }
        };

        let encoded = codec::encode(raw, options.compress, self.compression_threshold)?;
        let now = Utc::now();
        let snapshot = Snapshot {
            snapshot_id: Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            version_id: version_id.to_string(),
            snapshot_type,
            status: SnapshotStatus::Active,
            record_count: records.len() as u64,
            original_size: encoded.original_size,
            compressed_size: encoded.stored.len() as u64,
            compression: encoded.compression,
            data_hash: records_hash,
            payload_hash: encoded.payload_hash,
            dataset_size,
            parent_snapshot_id: parent,
            base_snapshot_id: base,
            chain_depth: depth,
            created_at: now,
            expires_at: now + Duration::days(i64::from(options.retention_days)),
        };

        self.store.insert_snapshot(&snapshot, &encoded.stored)?;
        self.cache.invalidate_snapshot(&snapshot.snapshot_id)?;

        info!(
            event = "SNAPSHOT_CREATED",
            snapshot_id = %snapshot.snapshot_id,
            source_id,
            version_id,
            snapshot_type = %snapshot.snapshot_type,
            records = snapshot.record_count,
            original_size = snapshot.original_size,
            compressed_size = snapshot.compressed_size,
            chain_depth = snapshot.chain_depth,
            "Snapshot created"
        );
        Ok(snapshot)
    }

    fn resolve_predecessor(
        &self,
        source_id: &str,
        requested: SnapshotType,
        options: &SnapshotOptions,
    ) -> VaultResult<Option<Snapshot>> {
        let predecessor = match options.predecessor {
            Some(ref id) => {
                let pred = self.get_snapshot(id)?;
                if pred.source_id != source_id {
                    return Err(VaultError::validation(format!(
                        "Snapshot {} belongs to source {}",
                        id, pred.source_id
                    )));
                }
                if requested == SnapshotType::Differential && pred.snapshot_type != SnapshotType::Full {
                    return Err(VaultError::validation(format!(
                        "Differential base {} is not a FULL snapshot",
                        id
                    )));
                }
                Some(pred)
            }
            None => {
                let mut filter = SnapshotFilter::for_source(source_id).with_status(SnapshotStatus::Active);
                if requested == SnapshotType::Differential {
                    filter = filter.with_type(SnapshotType::Full);
                }
                self.store.query_snapshots(&filter)?.pop()
            }
        };

        match predecessor {
            Some(pred) if requested == SnapshotType::Incremental && pred.chain_depth + 1 > self.max_chain_hops => {
                warn!(
                    event = "SNAPSHOT_PROMOTED_FULL",
                    source_id,
                    predecessor = %pred.snapshot_id,
                    chain_depth = pred.chain_depth,
                    "Chain at hop limit; storing FULL snapshot"
                );
                Ok(None)
            }
            Some(pred) => Ok(Some(pred)),
            None => {
                debug!(
                    event = "SNAPSHOT_PROMOTED_FULL",
                    source_id,
                    requested = %requested,
                    "No predecessor snapshot; storing FULL snapshot"
                );
                Ok(None)
            }
        }
    }

    /// Delta from `predecessor` to `records`, or `None` when replaying it
    /// would not reproduce `records_hash`
    fn delta_from(
        &self,
        predecessor: &Snapshot,
        records: &[Record],
        key_field: &str,
        records_hash: &str,
    ) -> VaultResult<Option<Delta>> {
        let base = self.restore_chain(&predecessor.snapshot_id)?;
        let delta = Delta::from(&self.diff.create_patch(&base, records, key_field));

        let replayed = data_hash(&apply_delta(&base, &delta))?;
        if replayed != records_hash {
            warn!(
                event = "SNAPSHOT_PROMOTED_FULL",
                predecessor = %predecessor.snapshot_id,
                key_field,
                "Delta does not replay to the dataset; storing FULL snapshot"
            );
            return Ok(None);
        }
        Ok(Some(delta))
    }

    // ------------------------------------------------------------------
    // reads
    // ------------------------------------------------------------------

    pub fn get_snapshot(&self, snapshot_id: &str) -> VaultResult<Snapshot> {
        if let Some(snapshot) = self.cache.get_snapshot(snapshot_id)? {
            return Ok(snapshot);
        }
        let ticket = self.cache.snapshot_ticket()?;
        let snapshot = self
            .store
            .get_snapshot(snapshot_id)?
            .ok_or_else(|| VaultError::not_found(format!("Snapshot {}", snapshot_id)))?;
        self.cache.put_snapshot(&snapshot, ticket)?;
        Ok(snapshot)
    }

    pub fn list_snapshots(&self, filter: &SnapshotFilter) -> VaultResult<Vec<Snapshot>> {
        self.store.query_snapshots(filter)
    }

    fn lookup(&self, snapshot_id: &str) -> VaultResult<Option<Snapshot>> {
        match self.get_snapshot(snapshot_id) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(VaultError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Chain ids from the FULL root to `snapshot_id`
    pub fn get_chain(&self, snapshot_id: &str) -> VaultResult<Vec<SnapshotId>> {
        let chain = chain::resolve(snapshot_id, self.max_chain_hops, |id| self.lookup(id))?;
        Ok(chain.into_iter().map(|s| s.snapshot_id).collect())
    }

    fn load_payload(&self, snapshot: &Snapshot) -> VaultResult<Payload> {
        let stored = self.store.get_blob(&snapshot.blob_key())?.ok_or_else(|| {
            VaultError::integrity(format!(
                "Payload blob {} of snapshot {} is missing",
                snapshot.blob_key(),
                snapshot.snapshot_id
            ))
        })?;
        let raw = codec::decode(&stored, snapshot.compression, &snapshot.payload_hash)?;
        Payload::from_bytes(&raw, snapshot.snapshot_type)
    }

    /// Materialize the dataset stored by `snapshot_id`
    ///
    /// Read-only and lock-free. Replays the chain oldest first and checks
    /// the result against the target's `data_hash`.
    pub fn restore_chain(&self, snapshot_id: &str) -> VaultResult<Vec<Record>> {
        let chain = chain::resolve(snapshot_id, self.max_chain_hops, |id| self.lookup(id))?;

        let mut records: Vec<Record> = Vec::new();
        for (i, snapshot) in chain.iter().enumerate() {
            match (i, self.load_payload(snapshot)?) {
                (0, Payload::Full(full)) => records = full,
                (_, Payload::Delta(delta)) if i > 0 => records = apply_delta(&records, &delta),
                _ => {
                    return Err(VaultError::integrity(format!(
                        "Snapshot {} payload does not match its position in the chain",
                        snapshot.snapshot_id
                    )))
                }
            }
        }

        // resolve() never returns an empty chain
        let target = &chain[chain.len() - 1];
        let actual = data_hash(&records)?;
        if actual != target.data_hash {
            return Err(VaultError::integrity(format!(
                "Snapshot {} restored to hash {}, expected {}",
                snapshot_id, actual, target.data_hash
            )));
        }

        debug!(
            event = "SNAPSHOT_RESTORED",
            snapshot_id,
            chain_length = chain.len(),
            records = records.len(),
            "Snapshot chain restored"
        );
        Ok(records)
    }

    /// Restore and report instead of failing on chain or integrity errors
    pub fn verify_snapshot(&self, snapshot_id: &str) -> VaultResult<SnapshotCheck> {
        let snapshot = self.get_snapshot(snapshot_id)?;
        let chain = match self.get_chain(snapshot_id) {
            Ok(chain) => chain,
            Err(e) if e.is_fatal() => {
                return Ok(SnapshotCheck {
                    snapshot_id: snapshot.snapshot_id,
                    chain: Vec::new(),
                    valid: false,
                    record_count: None,
                    error: Some(e.to_string()),
                })
            }
            Err(e) => return Err(e),
        };

        match self.restore_chain(snapshot_id) {
            Ok(records) => Ok(SnapshotCheck {
                snapshot_id: snapshot.snapshot_id,
                chain,
                valid: true,
                record_count: Some(records.len() as u64),
                error: None,
            }),
            Err(e) if e.is_fatal() => {
                warn!(
                    event = "SNAPSHOT_VERIFY_FAILED",
                    snapshot_id,
                    error = %e,
                    "Snapshot failed verification"
                );
                Ok(SnapshotCheck {
                    snapshot_id: snapshot.snapshot_id,
                    chain,
                    valid: false,
                    record_count: None,
                    error: Some(e.to_string()),
                })
            }
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    /// ACTIVE → ARCHIVED; archiving an archived snapshot is a no-op
    pub fn archive_snapshot(&self, snapshot_id: &str, actor: &Actor) -> VaultResult<Snapshot> {
        let result = self.archive_inner(snapshot_id);
        let source = match result {
            Ok(ref s) => s.source_id.clone(),
            Err(_) => self.source_hint(snapshot_id),
        };
        let entry = NewEntry::new(source, HistoryAction::Archive, actor)
            .with_detail("snapshot_id", snapshot_id);
        let entry = match result {
            Ok(ref s) => entry.with_version(s.version_id.as_str()),
            Err(_) => entry,
        };
        self.history.record_outcome(entry, result)
    }

    fn archive_inner(&self, snapshot_id: &str) -> VaultResult<Snapshot> {
        let mut snapshot = self.get_snapshot(snapshot_id)?;
        match snapshot.status {
            SnapshotStatus::Archived => return Ok(snapshot),
            SnapshotStatus::Active => {}
            other => {
                return Err(VaultError::conflict(format!(
                    "Snapshot {} is {} and cannot be archived",
                    snapshot_id, other
                )))
            }
        }
        self.store.set_snapshot_status(snapshot_id, SnapshotStatus::Archived)?;
        self.cache.invalidate_snapshot(snapshot_id)?;
        snapshot.status = SnapshotStatus::Archived;
        info!(
            event = "SNAPSHOT_ARCHIVED",
            snapshot_id,
            source_id = %snapshot.source_id,
            "Snapshot archived"
        );
        Ok(snapshot)
    }

    /// Delete a snapshot that nothing depends on
    ///
    /// Soft delete flips the status to DELETED and keeps the payload; hard
    /// delete removes the row and, when no other row shares it, the blob.
    /// A required ancestor (or the snapshot of an ACTIVE version) is a
    /// `Conflict`.
    pub fn delete_snapshot(&self, snapshot_id: &str, hard: bool, actor: &Actor) -> VaultResult<()> {
        let result = self.delete_inner(snapshot_id, hard);
        let entry = NewEntry::new(self.source_hint(snapshot_id), HistoryAction::Delete, actor)
            .with_detail("snapshot_id", snapshot_id)
            .with_detail("hard", hard);
        self.history.record_outcome(entry, result).map(|_| ())
    }

    fn delete_inner(&self, snapshot_id: &str, hard: bool) -> VaultResult<u64> {
        let snapshot = self.get_snapshot(snapshot_id)?;
        let siblings = self
            .store
            .query_snapshots(&SnapshotFilter::for_source(snapshot.source_id.as_str()))?;
        let required = chain::required_ancestors(&siblings, &HashSet::new(), self.max_chain_hops);
        if required.contains(snapshot_id) {
            return Err(VaultError::conflict(format!(
                "Snapshot {} is required by a dependent snapshot",
                snapshot_id
            )));
        }
        if self.active_snapshot_ids(&snapshot.source_id)?.contains(snapshot_id) {
            return Err(VaultError::conflict(format!(
                "Snapshot {} backs an ACTIVE version",
                snapshot_id
            )));
        }

        if !hard {
            if snapshot.status != SnapshotStatus::Deleted {
                self.store.set_snapshot_status(snapshot_id, SnapshotStatus::Deleted)?;
                self.cache.invalidate_snapshot(snapshot_id)?;
            }
            info!(event = "SNAPSHOT_DELETED", snapshot_id, hard, "Snapshot soft-deleted");
            return Ok(0);
        }

        let freed = self.remove_with_blob(&snapshot)?;
        info!(
            event = "SNAPSHOT_DELETED",
            snapshot_id,
            hard,
            bytes_freed = freed,
            "Snapshot removed"
        );
        Ok(freed)
    }

    /// Remove the row; the store drops the blob unless another row shares it
    fn remove_with_blob(&self, snapshot: &Snapshot) -> VaultResult<u64> {
        let freed = self.store.remove_snapshot(&snapshot.snapshot_id)?;
        self.cache.invalidate_snapshot(&snapshot.snapshot_id)?;
        Ok(freed.unwrap_or(0))
    }

    /// Drop a snapshot whose version was never committed
    pub(crate) fn discard(&self, snapshot: &Snapshot) -> VaultResult<()> {
        self.remove_with_blob(snapshot)?;
        debug!(
            event = "SNAPSHOT_DISCARDED",
            snapshot_id = %snapshot.snapshot_id,
            "Uncommitted snapshot discarded"
        );
        Ok(())
    }

    fn active_snapshot_ids(&self, source_id: &str) -> VaultResult<HashSet<String>> {
        let active = self
            .store
            .query_versions(&VersionFilter::for_source(source_id).with_status(VersionStatus::Active))?;
        Ok(active.into_iter().map(|v| v.snapshot_id).collect())
    }

    /// Source of a snapshot for history attribution, even if it is gone
    fn source_hint(&self, snapshot_id: &str) -> String {
        match self.store.get_snapshot(snapshot_id) {
            Ok(Some(s)) => s.source_id,
            _ => "unknown".to_string(),
        }
    }

    /// Retention sweep over expired snapshots
    ///
    /// Expired snapshots that a live snapshot still replays on top of, or
    /// that back an ACTIVE version, are marked EXPIRED and kept; the rest
    /// are hard-deleted.
    pub fn cleanup_expired_snapshots(
        &self,
        source_id: Option<&str>,
        dry_run: bool,
        actor: &Actor,
    ) -> VaultResult<CleanupReport> {
        self.cleanup_expired_at(Utc::now(), source_id, dry_run, actor)
    }

    /// Same as [`Self::cleanup_expired_snapshots`] with an explicit clock
    pub fn cleanup_expired_at(
        &self,
        now: DateTime<Utc>,
        source_id: Option<&str>,
        dry_run: bool,
        actor: &Actor,
    ) -> VaultResult<CleanupReport> {
        let result = self.cleanup_at(now, source_id, dry_run);
        let mut entry = NewEntry::new(source_id.unwrap_or("*"), HistoryAction::Cleanup, actor)
            .with_detail("dry_run", dry_run);
        if let Ok(ref report) = result {
            entry = entry
                .with_affected_records(report.deleted.len() as u64)
                .with_detail("retained", report.retained.len())
                .with_detail("bytes_freed", report.bytes_freed);
        }
        self.history.record_outcome(entry, result)
    }

    pub(crate) fn cleanup_at(
        &self,
        now: DateTime<Utc>,
        source_id: Option<&str>,
        dry_run: bool,
    ) -> VaultResult<CleanupReport> {
        let filter = SnapshotFilter {
            source_id: source_id.map(str::to_string),
            ..Default::default()
        };
        let snapshots = self.store.query_snapshots(&filter)?;

        let mut pinned = HashSet::new();
        let sources: HashSet<&str> = snapshots.iter().map(|s| s.source_id.as_str()).collect();
        for source in sources {
            pinned.extend(self.active_snapshot_ids(source)?);
        }

        let mut reclaimable: HashSet<String> = snapshots
            .iter()
            .filter(|s| s.status != SnapshotStatus::Deleted && s.is_expired(now))
            .filter(|s| !pinned.contains(&s.snapshot_id))
            .map(|s| s.snapshot_id.clone())
            .collect();

        // Keeping one snapshot can make its own ancestors required; iterate to a fixed point
        loop {
            let required = chain::required_ancestors(&snapshots, &reclaimable, self.max_chain_hops);
            let before = reclaimable.len();
            reclaimable.retain(|id| !required.contains(id));
            if reclaimable.len() == before {
                break;
            }
        }

        let mut report = CleanupReport {
            dry_run,
            ..Default::default()
        };
        let by_id: HashMap<&str, &Snapshot> =
            snapshots.iter().map(|s| (s.snapshot_id.as_str(), s)).collect();

        for snapshot in snapshots.iter().filter(|s| s.status != SnapshotStatus::Deleted && s.is_expired(now)) {
            if reclaimable.contains(&snapshot.snapshot_id) {
                report.deleted.push(snapshot.snapshot_id.clone());
            } else {
                report.retained.push(snapshot.snapshot_id.clone());
            }
        }

        if dry_run {
            report.bytes_freed = report
                .deleted
                .iter()
                .filter_map(|id| by_id.get(id.as_str()))
                .map(|s| s.compressed_size)
                .sum();
        } else {
            for id in &report.deleted {
                if let Some(snapshot) = by_id.get(id.as_str()) {
                    report.bytes_freed += self.remove_with_blob(snapshot)?;
                }
            }
            for id in &report.retained {
                if by_id.get(id.as_str()).map(|s| s.status) != Some(SnapshotStatus::Expired) {
                    self.store.set_snapshot_status(id, SnapshotStatus::Expired)?;
                    self.cache.invalidate_snapshot(id)?;
                }
            }
        }

        info!(
            event = "SNAPSHOT_CLEANUP",
            dry_run,
            deleted = report.deleted.len(),
            retained = report.retained.len(),
            bytes_freed = report.bytes_freed,
            "Snapshot cleanup finished"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // reporting
    // ------------------------------------------------------------------

    pub fn get_snapshot_stats(&self, source_id: Option<&str>) -> VaultResult<SnapshotStats> {
        let snapshots = self.store.query_snapshots(&SnapshotFilter {
            source_id: source_id.map(str::to_string),
            ..Default::default()
        })?;

        let mut stats = SnapshotStats::default();
        for s in &snapshots {
            stats.total_snapshots += 1;
            *stats.by_status.entry(s.status).or_insert(0) += 1;
            *stats.by_type.entry(s.snapshot_type).or_insert(0) += 1;
            *stats.by_source.entry(s.source_id.clone()).or_insert(0) += 1;
            stats.total_records += s.record_count;
            stats.total_original_size += s.original_size;
            stats.total_compressed_size += s.compressed_size;
            stats.max_chain_depth = stats.max_chain_depth.max(s.chain_depth);
        }
        stats.compression_ratio = if stats.total_original_size == 0 {
            1.0
        } else {
            stats.total_compressed_size as f64 / stats.total_original_size as f64
        };
        Ok(stats)
    }

    /// Savings of delta + compressed storage over storing every dataset in full
    pub fn calculate_storage_savings(&self, source_id: Option<&str>) -> VaultResult<StorageSavings> {
        let snapshots = self.store.query_snapshots(&SnapshotFilter {
            source_id: source_id.map(str::to_string),
            ..Default::default()
        })?;

        let mut savings = StorageSavings::default();
        for s in snapshots.iter().filter(|s| s.status != SnapshotStatus::Deleted) {
            savings.snapshot_count += 1;
            savings.full_equivalent_bytes += s.dataset_size;
            savings.payload_bytes += s.original_size;
            savings.stored_bytes += s.compressed_size;
        }
        savings.delta_savings_bytes = savings
            .full_equivalent_bytes
            .saturating_sub(savings.payload_bytes);
        savings.compression_savings_bytes = savings.payload_bytes.saturating_sub(savings.stored_bytes);
        savings.total_savings_bytes = savings
            .full_equivalent_bytes
            .saturating_sub(savings.stored_bytes);
        savings.savings_percent = if savings.full_equivalent_bytes == 0 {
            0.0
        } else {
            savings.total_savings_bytes as f64 / savings.full_equivalent_bytes as f64 * 100.0
        };
        Ok(savings)
    }
}
