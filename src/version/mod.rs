//! Version lineage
//!
//! [`VersionManager`] is the entry point of the vault. It numbers
//! versions per `(source_id, branch)`, delegates payloads to the
//! [`SnapshotManager`], summarizes changes with the [`DiffEngine`], and
//! writes one history entry per mutating call.
//!
//! # Head invariant
//!
//! Each `(source_id, branch)` has exactly one ACTIVE version once a
//! create or rollback has completed. The previous head is flipped and the
//! new version inserted by one conditional commit in the store, under an
//! advisory lock for the branch.
//!
//! # Type mapping
//!
//! | Version       | Snapshot                              |
//! |---------------|---------------------------------------|
//! | `FULL`        | `FULL`                                |
//! | `INCREMENTAL` | `INCREMENTAL` against the head        |
//! | `DELTA`       | `DIFFERENTIAL` against the FULL root  |
//!
//! The first version of a branch, and any delta whose chain would grow
//! past `max_delta_chain`, is stored FULL.

mod types;

pub use types::{
    BranchInfo, Supersede, Version, VersionFilter, VersionId, VersionStatus, VersionType,
    DEFAULT_BRANCH,
};

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::MetadataCache;
use crate::config::VaultConfig;
use crate::diff::{DiffEngine, DiffOptions, DiffResult};
use crate::error::{VaultError, VaultResult};
use crate::history::{Actor, HistoryAction, HistoryTracker, NewEntry};
use crate::lock::BranchLocks;
use crate::record::Record;
use crate::snapshot::{SnapshotCheck, SnapshotManager, SnapshotOptions, SnapshotType};
use crate::storage::VaultStore;

/// Tag attached to versions created by a rollback
pub const ROLLBACK_TAG: &str = "rollback";

/// Options for [`VersionManager::create_version`]
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub version_type: VersionType,
    pub description: String,
    pub tags: BTreeSet<String>,
    /// Key for change summaries and deltas; the configured default when `None`
    pub key_field: Option<String>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            version_type: VersionType::Full,
            description: String::new(),
            tags: BTreeSet::new(),
            key_field: None,
        }
    }
}

impl CreateOptions {
    pub fn of_type(version_type: VersionType) -> Self {
        Self {
            version_type,
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn keyed_by(mut self, key_field: impl Into<String>) -> Self {
        self.key_field = Some(key_field.into());
        self
    }
}

/// Result of [`VersionManager::verify_version`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionCheck {
    pub version_id: VersionId,
    pub valid: bool,
    pub snapshot: SnapshotCheck,
    pub error: Option<String>,
}

/// Everything `create_locked` needs besides the records
struct Plan<'a> {
    source_id: &'a str,
    branch: &'a str,
    options: &'a CreateOptions,
    actor: &'a Actor,
    /// Status given to the superseded head
    supersede_as: VersionStatus,
    /// Parent when it is not the current head (new branches)
    parent_override: Option<VersionId>,
    extra_summary: Map<String, Value>,
}

pub struct VersionManager {
    store: Arc<dyn VaultStore>,
    cache: Arc<MetadataCache>,
    history: Arc<HistoryTracker>,
    snapshots: Arc<SnapshotManager>,
    locks: BranchLocks,
    diff: DiffEngine,
    config: VaultConfig,
}

fn validate_name(kind: &str, name: &str) -> VaultResult<()> {
    if name.trim().is_empty() {
        return Err(VaultError::validation(format!("{} must not be empty", kind)));
    }
    if name.len() > 128 {
        return Err(VaultError::validation(format!("{} is longer than 128 bytes", kind)));
    }
    let ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if !ok {
        return Err(VaultError::validation(format!("{} {:?} has invalid characters", kind, name)));
    }
    Ok(())
}

fn validate_tag(tag: &str) -> VaultResult<()> {
    if tag.trim().is_empty() || tag.trim() != tag {
        return Err(VaultError::validation(format!("Invalid tag {:?}", tag)));
    }
    Ok(())
}

impl VersionManager {
    /// Build a vault over `store`; the config is validated first
    pub fn new(store: Arc<dyn VaultStore>, config: VaultConfig) -> VaultResult<Self> {
        config.validate()?;
        let cache = Arc::new(MetadataCache::new(config.cache_max_entries));
        let history = Arc::new(HistoryTracker::new(store.clone()));
        let snapshots = Arc::new(SnapshotManager::new(
            store.clone(),
            history.clone(),
            cache.clone(),
            &config,
        ));
        Ok(Self {
            store,
            cache,
            history,
            snapshots,
            locks: BranchLocks::new(config.lock_timeout()),
            diff: DiffEngine::new(config.case_sensitive_diff),
            config,
        })
    }

    pub fn history(&self) -> &HistoryTracker {
        &self.history
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn diff_engine(&self) -> &DiffEngine {
        &self.diff
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    fn key_field<'a>(&'a self, options: &'a CreateOptions) -> &'a str {
        options
            .key_field
            .as_deref()
            .unwrap_or(&self.config.default_key_field)
    }

    // ------------------------------------------------------------------
    // creation
    // ------------------------------------------------------------------

    /// Append a new ACTIVE version to `(source_id, branch)`
    pub fn create_version(
        &self,
        source_id: &str,
        branch: &str,
        records: &[Record],
        options: &CreateOptions,
        actor: &Actor,
    ) -> VaultResult<Version> {
        let result = self.create_version_inner(source_id, branch, records, options, actor);
        let mut entry = NewEntry::new(source_id, HistoryAction::Create, actor)
            .with_affected_records(records.len() as u64)
            .with_detail("branch", branch)
            .with_detail("requested_type", options.version_type.as_str());
        if let Ok(ref version) = result {
            entry = entry
                .with_version(version.version_id.as_str())
                .with_detail("version_number", version.version_number)
                .with_detail("type", version.version_type.as_str());
        }
        self.history.record_outcome(entry, result)
    }

    fn create_version_inner(
        &self,
        source_id: &str,
        branch: &str,
        records: &[Record],
        options: &CreateOptions,
        actor: &Actor,
    ) -> VaultResult<Version> {
        validate_name("source_id", source_id)?;
        validate_name("branch", branch)?;
        for tag in &options.tags {
            validate_tag(tag)?;
        }

        let _guard = self.locks.acquire(source_id, branch)?;
        if branch != DEFAULT_BRANCH && self.branch_versions(source_id, branch)?.is_empty() {
            return Err(VaultError::validation(format!(
                "Unknown branch {:?} for source {}",
                branch, source_id
            )));
        }

        self.create_locked(
            records,
            Plan {
                source_id,
                branch,
                options,
                actor,
                supersede_as: VersionStatus::Archived,
                parent_override: None,
                extra_summary: Map::new(),
            },
        )
    }

    /// Create a version; the branch lock must be held
    fn create_locked(&self, records: &[Record], plan: Plan<'_>) -> VaultResult<Version> {
        let Plan {
            source_id,
            branch,
            options,
            actor,
            supersede_as,
            parent_override,
            extra_summary,
        } = plan;
        let key_field = self.key_field(options);

        let head = self.active_on(source_id, branch)?;
        let next_number = self
            .branch_versions(source_id, branch)?
            .last()
            .map_or(1, |v| v.version_number + 1);

        let mut summary = extra_summary;
        summary.insert("requested_type".into(), json!(options.version_type.as_str()));

        let mut snapshot_type = options.version_type.snapshot_type();
        let mut predecessor = None;

        match head {
            Some(ref head) if options.version_type.is_delta() => {
                let base = self.materialize(&head.version_id)?;
                let diff = self.diff.compute_diff(&base, records, key_field, &BTreeSet::new());
                let anomalies = self.diff.detect_anomalies(&diff, &self.config.anomaly);
                if !anomalies.is_empty() {
                    warn!(
                        event = "VERSION_ANOMALIES",
                        source_id,
                        branch,
                        count = anomalies.len(),
                        change_rate = diff.change_rate(),
                        "Change anomalies detected"
                    );
                }
                let counts = diff.summary();
                summary.insert("added".into(), json!(counts.added));
                summary.insert("deleted".into(), json!(counts.deleted));
                summary.insert("modified".into(), json!(counts.modified));
                summary.insert("unchanged".into(), json!(counts.unchanged));
                summary.insert("change_rate".into(), json!(counts.change_rate));
                summary.insert("anomalies".into(), serde_json::to_value(&anomalies)?);

                let chain = self.snapshots.get_chain(&head.snapshot_id)?;
                let (pred, depth) = match options.version_type {
                    VersionType::Delta => (chain.first().cloned(), 1),
                    _ => (Some(head.snapshot_id.clone()), chain.len()),
                };
                if depth > self.config.max_delta_chain {
                    info!(
                        event = "VERSION_PROMOTED_FULL",
                        source_id,
                        branch,
                        chain_depth = depth,
                        max_delta_chain = self.config.max_delta_chain,
                        "Delta chain too deep; storing FULL"
                    );
                    summary.insert("promoted_to_full".into(), json!(true));
                    snapshot_type = SnapshotType::Full;
                } else {
                    predecessor = pred;
                }
            }
            None if options.version_type.is_delta() => {
                summary.insert("promoted_to_full".into(), json!(true));
                snapshot_type = SnapshotType::Full;
            }
            _ => {}
        }

        let version_id = Uuid::new_v4().to_string();
        let snapshot_options = SnapshotOptions {
            compress: self.config.compress_snapshots,
            retention_days: self.config.snapshot_retention_days,
            predecessor,
            key_field: key_field.to_string(),
        };
        let snapshot =
            self.snapshots
                .persist(source_id, &version_id, records, snapshot_type, &snapshot_options)?;

        let version_type = match snapshot.snapshot_type {
            SnapshotType::Full => VersionType::Full,
            _ => options.version_type,
        };
        if version_type != options.version_type {
            summary.insert("promoted_to_full".into(), json!(true));
        }

        let version = Version {
            version_id,
            source_id: source_id.to_string(),
            branch: branch.to_string(),
            version_number: next_number,
            parent_version_id: parent_override.or_else(|| head.as_ref().map(|h| h.version_id.clone())),
            version_type,
            status: VersionStatus::Active,
            record_count: records.len() as u64,
            data_hash: snapshot.data_hash.clone(),
            size_bytes: snapshot.dataset_size,
            snapshot_id: snapshot.snapshot_id.clone(),
            tags: options.tags.clone(),
            created_at: Utc::now(),
            created_by: actor.name.clone(),
            description: options.description.clone(),
            changes_summary: summary,
        };
        let supersede = head.as_ref().map(|h| Supersede {
            version_id: h.version_id.clone(),
            status: supersede_as,
        });

        if let Err(e) = self.store.commit_version(&version, supersede.as_ref()) {
            if let Err(cleanup) = self.snapshots.discard(&snapshot) {
                warn!(
                    event = "SNAPSHOT_DISCARD_FAILED",
                    snapshot_id = %snapshot.snapshot_id,
                    error = %cleanup,
                    "Could not discard snapshot of failed commit"
                );
            }
            return Err(e);
        }

        if let Some(ref s) = supersede {
            self.cache.invalidate_version(&s.version_id)?;
        }
        self.cache.invalidate_version(&version.version_id)?;

        info!(
            event = "VERSION_CREATED",
            version_id = %version.version_id,
            source_id,
            branch,
            version_number = version.version_number,
            version_type = %version.version_type,
            records = version.record_count,
            "Version created"
        );
        Ok(version)
    }

    /// Append a FULL copy of `target_version_id` as the new head
    ///
    /// The current head becomes ROLLED_BACK; the target and every other
    /// existing version are left untouched.
    pub fn rollback_to_version(
        &self,
        source_id: &str,
        target_version_id: &str,
        actor: &Actor,
        reason: &str,
    ) -> VaultResult<Version> {
        let result = self.rollback_inner(source_id, target_version_id, actor, reason);
        let mut entry = NewEntry::new(source_id, HistoryAction::Rollback, actor)
            .with_detail("target_version_id", target_version_id)
            .with_detail("reason", reason);
        if let Ok(ref version) = result {
            entry = entry
                .with_version(version.version_id.as_str())
                .with_affected_records(version.record_count)
                .with_summary(format!(
                    "Rolled back {} to version {} as version {}",
                    source_id, target_version_id, version.version_number
                ));
        }
        self.history.record_outcome(entry, result)
    }

    fn rollback_inner(
        &self,
        source_id: &str,
        target_version_id: &str,
        actor: &Actor,
        reason: &str,
    ) -> VaultResult<Version> {
        let target = self.get_version(target_version_id)?;
        if target.source_id != source_id {
            return Err(VaultError::validation(format!(
                "Version {} belongs to source {}",
                target_version_id, target.source_id
            )));
        }
        if target.status == VersionStatus::Deleted {
            return Err(VaultError::validation(format!(
                "Version {} has been purged",
                target_version_id
            )));
        }

        let _guard = self.locks.acquire(source_id, &target.branch)?;
        let head = self.active_on(source_id, &target.branch)?.ok_or_else(|| {
            VaultError::conflict(format!("Branch {} has no ACTIVE version", target.branch))
        })?;
        if head.version_id == target.version_id {
            return Err(VaultError::conflict(format!(
                "Version {} is already the ACTIVE version",
                target_version_id
            )));
        }

        let records = self.materialize(target_version_id)?;
        let options = CreateOptions::default()
            .with_description(reason)
            .with_tag(ROLLBACK_TAG);

        let mut extra = Map::new();
        extra.insert("rolled_back_to".into(), json!(target.version_id));
        extra.insert("rolled_back_to_number".into(), json!(target.version_number));
        extra.insert("rolled_back_from".into(), json!(head.version_id));

        let version = self.create_locked(
            &records,
            Plan {
                source_id,
                branch: &target.branch,
                options: &options,
                actor,
                supersede_as: VersionStatus::RolledBack,
                parent_override: None,
                extra_summary: extra,
            },
        )?;

        warn!(
            event = "VERSION_ROLLED_BACK",
            source_id,
            branch = %target.branch,
            target_version_id,
            previous_version_id = %head.version_id,
            new_version_id = %version.version_id,
            "Branch rolled back"
        );
        Ok(version)
    }

    /// Start `branch_name` at a copy of `from_version_id`
    pub fn create_branch(
        &self,
        source_id: &str,
        from_version_id: &str,
        branch_name: &str,
        actor: &Actor,
    ) -> VaultResult<Version> {
        let result = self.create_branch_inner(source_id, from_version_id, branch_name, actor);
        let mut entry = NewEntry::new(source_id, HistoryAction::Branch, actor)
            .with_detail("branch", branch_name)
            .with_detail("from_version_id", from_version_id);
        if let Ok(ref version) = result {
            entry = entry
                .with_version(version.version_id.as_str())
                .with_affected_records(version.record_count);
        }
        self.history.record_outcome(entry, result)
    }

    fn create_branch_inner(
        &self,
        source_id: &str,
        from_version_id: &str,
        branch_name: &str,
        actor: &Actor,
    ) -> VaultResult<Version> {
        validate_name("branch", branch_name)?;
        let from = self.get_version(from_version_id)?;
        if from.source_id != source_id {
            return Err(VaultError::validation(format!(
                "Version {} belongs to source {}",
                from_version_id, from.source_id
            )));
        }
        if from.status == VersionStatus::Deleted {
            return Err(VaultError::validation(format!(
                "Version {} has been purged",
                from_version_id
            )));
        }

        let _guard = self.locks.acquire(source_id, branch_name)?;
        if !self.branch_versions(source_id, branch_name)?.is_empty() {
            return Err(VaultError::conflict(format!(
                "Branch {:?} already exists for source {}",
                branch_name, source_id
            )));
        }

        let records = self.materialize(from_version_id)?;
        let options = CreateOptions::default()
            .with_description(format!("Branched from {} v{}", from.branch, from.version_number));

        let mut extra = Map::new();
        extra.insert("branched_from".into(), json!(from.version_id));
        extra.insert("branched_from_branch".into(), json!(from.branch));

        let version = self.create_locked(
            &records,
            Plan {
                source_id,
                branch: branch_name,
                options: &options,
                actor,
                supersede_as: VersionStatus::Archived,
                parent_override: Some(from.version_id.clone()),
                extra_summary: extra,
            },
        )?;

        info!(
            event = "BRANCH_CREATED",
            source_id,
            branch = branch_name,
            from_version_id,
            version_id = %version.version_id,
            "Branch created"
        );
        Ok(version)
    }

    // ------------------------------------------------------------------
    // tags
    // ------------------------------------------------------------------

    /// Add `tag`; adding a tag that is already present changes nothing
    pub fn add_tag(&self, version_id: &str, tag: &str, actor: &Actor) -> VaultResult<Version> {
        self.update_tags(version_id, tag, actor, true)
    }

    /// Remove `tag`; removing an absent tag changes nothing
    pub fn remove_tag(&self, version_id: &str, tag: &str, actor: &Actor) -> VaultResult<Version> {
        self.update_tags(version_id, tag, actor, false)
    }

    fn update_tags(&self, version_id: &str, tag: &str, actor: &Actor, add: bool) -> VaultResult<Version> {
        let action = if add { HistoryAction::Tag } else { HistoryAction::Untag };
        let result = self.update_tags_inner(version_id, tag, add);
        let source = match result {
            Ok((ref v, _)) => v.source_id.clone(),
            Err(_) => self.source_hint(version_id),
        };
        let mut entry = NewEntry::new(source, action, actor)
            .with_version(version_id)
            .with_detail("tag", tag);
        if let Ok((_, changed)) = result {
            entry = entry.with_detail("changed", changed);
        }
        self.history
            .record_outcome(entry, result)
            .map(|(version, _)| version)
    }

    fn update_tags_inner(&self, version_id: &str, tag: &str, add: bool) -> VaultResult<(Version, bool)> {
        validate_tag(tag)?;
        let current = self.get_version(version_id)?;
        let _guard = self.locks.acquire(&current.source_id, &current.branch)?;

        // Re-read under the lock
        self.cache.invalidate_version(version_id)?;
        let mut version = self.get_version(version_id)?;
        if version.status == VersionStatus::Deleted {
            return Err(VaultError::validation(format!("Version {} has been purged", version_id)));
        }

        let changed = if add {
            version.tags.insert(tag.to_string())
        } else {
            version.tags.remove(tag)
        };
        if changed {
            self.store.update_version_tags(version_id, &version.tags)?;
            self.cache.invalidate_version(version_id)?;
            let event = if add { "VERSION_TAGGED" } else { "VERSION_UNTAGGED" };
            info!(
                event,
                version_id,
                tag,
                "Version tags updated"
            );
        }
        Ok((version, changed))
    }

    /// Most recent version of `source_id` carrying `tag`
    pub fn get_version_by_tag(&self, source_id: &str, tag: &str, branch: Option<&str>) -> VaultResult<Version> {
        let filter = VersionFilter {
            source_id: Some(source_id.to_string()),
            branch: branch.map(str::to_string),
            tag: Some(tag.to_string()),
            ..Default::default()
        };
        self.store
            .query_versions(&filter)?
            .into_iter()
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then(a.version_number.cmp(&b.version_number))
            })
            .ok_or_else(|| VaultError::not_found(format!("No version of {} tagged {:?}", source_id, tag)))
    }

    // ------------------------------------------------------------------
    // administration
    // ------------------------------------------------------------------

    /// Flip a non-ACTIVE version to DELETED
    pub fn purge_version(&self, version_id: &str, actor: &Actor, reason: &str) -> VaultResult<Version> {
        let result = self.purge_inner(version_id);
        let source = match result {
            Ok(ref v) => v.source_id.clone(),
            Err(_) => self.source_hint(version_id),
        };
        let entry = NewEntry::new(source, HistoryAction::Purge, actor)
            .with_version(version_id)
            .with_detail("reason", reason);
        self.history.record_outcome(entry, result)
    }

    fn purge_inner(&self, version_id: &str) -> VaultResult<Version> {
        let current = self.get_version(version_id)?;
        let _guard = self.locks.acquire(&current.source_id, &current.branch)?;
        self.cache.invalidate_version(version_id)?;
        let mut version = self.get_version(version_id)?;

        match version.status {
            VersionStatus::Active => {
                return Err(VaultError::conflict(format!(
                    "Version {} is ACTIVE and cannot be purged",
                    version_id
                )))
            }
            VersionStatus::Deleted => {
                return Err(VaultError::conflict(format!("Version {} is already purged", version_id)))
            }
            _ => {}
        }

        if !self
            .store
            .transition_version(version_id, version.status, VersionStatus::Deleted)?
        {
            return Err(VaultError::conflict(format!(
                "Version {} changed status concurrently",
                version_id
            )));
        }
        self.cache.invalidate_version(version_id)?;
        version.status = VersionStatus::Deleted;

        warn!(
            event = "VERSION_PURGED",
            version_id,
            source_id = %version.source_id,
            branch = %version.branch,
            "Version purged"
        );
        Ok(version)
    }

    fn source_hint(&self, version_id: &str) -> String {
        match self.store.get_version(version_id) {
            Ok(Some(v)) => v.source_id,
            _ => "unknown".to_string(),
        }
    }

    // ------------------------------------------------------------------
    // reads
    // ------------------------------------------------------------------

    pub fn get_version(&self, version_id: &str) -> VaultResult<Version> {
        if let Some(version) = self.cache.get_version(version_id)? {
            return Ok(version);
        }
        let ticket = self.cache.version_ticket()?;
        let version = self
            .store
            .get_version(version_id)?
            .ok_or_else(|| VaultError::not_found(format!("Version {}", version_id)))?;
        self.cache.put_version(&version, ticket)?;
        Ok(version)
    }

    /// Every version of the branch, DELETED included, by number
    fn branch_versions(&self, source_id: &str, branch: &str) -> VaultResult<Vec<Version>> {
        self.store
            .query_versions(&VersionFilter::for_branch(source_id, branch).including_deleted())
    }

    fn active_on(&self, source_id: &str, branch: &str) -> VaultResult<Option<Version>> {
        let mut active = self.store.query_versions(
            &VersionFilter::for_branch(source_id, branch).with_status(VersionStatus::Active),
        )?;
        if active.len() > 1 {
            return Err(VaultError::integrity(format!(
                "Branch {}/{} has {} ACTIVE versions",
                source_id,
                branch,
                active.len()
            )));
        }
        Ok(active.pop())
    }

    pub fn get_active_version(&self, source_id: &str, branch: &str) -> VaultResult<Option<Version>> {
        self.active_on(source_id, branch)
    }

    /// Highest-numbered non-DELETED version of the branch
    pub fn get_latest_version(&self, source_id: &str, branch: &str) -> VaultResult<Option<Version>> {
        Ok(self
            .store
            .query_versions(&VersionFilter::for_branch(source_id, branch))?
            .pop())
    }

    pub fn get_version_by_number(&self, source_id: &str, branch: &str, number: u64) -> VaultResult<Version> {
        self.branch_versions(source_id, branch)?
            .into_iter()
            .find(|v| v.version_number == number)
            .ok_or_else(|| {
                VaultError::not_found(format!("Version {} of {}/{}", number, source_id, branch))
            })
    }

    pub fn list_versions(&self, filter: &VersionFilter) -> VaultResult<Vec<Version>> {
        self.store.query_versions(filter)
    }

    pub fn list_branches(&self, source_id: &str) -> VaultResult<Vec<BranchInfo>> {
        let versions = self.store.query_versions(&VersionFilter::for_source(source_id))?;
        let mut branches: BTreeMap<String, BranchInfo> = BTreeMap::new();
        for v in versions {
            let info = branches.entry(v.branch.clone()).or_insert_with(|| BranchInfo {
                branch: v.branch.clone(),
                version_count: 0,
                head_version_number: 0,
                active_version_id: None,
                created_at: v.created_at,
            });
            info.version_count += 1;
            info.head_version_number = info.head_version_number.max(v.version_number);
            if v.created_at < info.created_at {
                info.created_at = v.created_at;
            }
            if v.is_active() {
                info.active_version_id = Some(v.version_id.clone());
            }
        }
        Ok(branches.into_values().collect())
    }

    /// `version_id` followed by its parents back to the root
    pub fn get_lineage(&self, version_id: &str) -> VaultResult<Vec<Version>> {
        let mut lineage = vec![self.get_version(version_id)?];
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(version_id.to_string());

        loop {
            let current = &lineage[lineage.len() - 1];
            let Some(parent_id) = current.parent_version_id.clone() else {
                break;
            };
            if !seen.insert(parent_id.clone()) {
                return Err(VaultError::integrity(format!(
                    "Version lineage of {} loops at {}",
                    version_id, parent_id
                )));
            }
            lineage.push(self.get_version(&parent_id)?);
        }
        Ok(lineage)
    }

    /// Full dataset of a version
    pub fn materialize(&self, version_id: &str) -> VaultResult<Vec<Record>> {
        let version = self.get_version(version_id)?;
        self.snapshots.restore_chain(&version.snapshot_id)
    }

    /// Diff two versions (source → target)
    pub fn compare_versions(
        &self,
        source_version_id: &str,
        target_version_id: &str,
        key_field: Option<&str>,
    ) -> VaultResult<DiffResult> {
        let source = self.materialize(source_version_id)?;
        let target = self.materialize(target_version_id)?;
        let options = DiffOptions {
            key_field: key_field.unwrap_or(&self.config.default_key_field).to_string(),
            case_sensitive: self.config.case_sensitive_diff,
            ..Default::default()
        };
        Ok(self
            .diff
            .compute_diff_with(&source, &target, &options)
            .with_versions(source_version_id, target_version_id))
    }

    /// Restore the version and check it against its recorded hash
    pub fn verify_version(&self, version_id: &str) -> VaultResult<VersionCheck> {
        let version = self.get_version(version_id)?;
        let snapshot = self.snapshots.verify_snapshot(&version.snapshot_id)?;
        let snapshot_hash = self.snapshots.get_snapshot(&version.snapshot_id)?.data_hash;

        let error = if !snapshot.valid {
            snapshot.error.clone()
        } else if snapshot_hash != version.data_hash {
            Some(format!(
                "Version hash {} does not match snapshot hash {}",
                version.data_hash, snapshot_hash
            ))
        } else {
            None
        };
        Ok(VersionCheck {
            version_id: version.version_id,
            valid: error.is_none(),
            snapshot,
            error,
        })
    }
}
