//! Version Lineage Invariant Tests
//!
//! - Numbers are gapless per branch and exactly one version is ACTIVE
//! - Rollback only appends; earlier versions are never touched
//! - Delta versions materialize to the full dataset
//! - Branches number independently of their origin branch
//! - Concurrent writers on one branch are serialized
//! - Repeated keys survive delta storage
//! - A refused commit leaves no snapshot behind and one failed audit entry

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use recordvault::history::{Actor, HistoryAction, HistoryEntry, HistoryFilter};
use recordvault::record::records_from_value;
use recordvault::snapshot::{Snapshot, SnapshotFilter, SnapshotStatus};
use recordvault::version::{Supersede, Version, VersionFilter, VersionStatus, VersionType};
use recordvault::{
    CreateOptions, MemoryStore, Record, VaultConfig, VaultError, VaultResult, VaultStore, VersionManager,
};
use serde_json::{json, Value};
use uuid::Uuid;

// =============================================================================
// Test Utilities
// =============================================================================

fn vault() -> VersionManager {
    VersionManager::new(Arc::new(MemoryStore::new()), VaultConfig::default())
        .expect("default config is valid")
}

fn records(value: Value) -> Vec<Record> {
    records_from_value(value).expect("fixture is a record array")
}

fn crawler() -> Actor {
    Actor::user("crawler")
}

fn active_count(vault: &VersionManager, source: &str, branch: &str) -> usize {
    vault
        .list_versions(&VersionFilter::for_branch(source, branch).with_status(VersionStatus::Active))
        .unwrap()
        .len()
}

// =============================================================================
// Numbering and the single ACTIVE head
// =============================================================================

#[test]
fn test_numbers_are_gapless_with_one_active() {
    let vault = vault();
    let types = [
        VersionType::Full,
        VersionType::Delta,
        VersionType::Incremental,
        VersionType::Incremental,
        VersionType::Delta,
        VersionType::Full,
    ];

    for (i, t) in types.iter().enumerate() {
        let rows: Vec<Value> = (0..=i).map(|n| json!({"id": n, "n": i})).collect();
        let version = vault
            .create_version("shop", "main", &records(json!(rows)), &CreateOptions::of_type(*t), &crawler())
            .unwrap();

        assert_eq!(version.version_number, i as u64 + 1);
        assert_eq!(active_count(&vault, "shop", "main"), 1);
        assert_eq!(
            vault.get_active_version("shop", "main").unwrap().unwrap().version_id,
            version.version_id
        );
    }

    let all = vault.list_versions(&VersionFilter::for_branch("shop", "main")).unwrap();
    let numbers: Vec<u64> = all.iter().map(|v| v.version_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(
        all.iter().filter(|v| v.status == VersionStatus::Archived).count(),
        5
    );
}

#[test]
fn test_concurrent_creates_are_serialized() {
    let vault = Arc::new(vault());
    vault
        .create_version("shop", "main", &[], &CreateOptions::default(), &crawler())
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let vault = Arc::clone(&vault);
            thread::spawn(move || {
                let data = records(json!([{"id": worker}]));
                vault
                    .create_version(
                        "shop",
                        "main",
                        &data,
                        &CreateOptions::of_type(VersionType::Incremental),
                        &Actor::user(format!("worker-{}", worker)),
                    )
                    .map(|v| v.version_number)
            })
        })
        .collect();

    let mut numbers: Vec<u64> = handles
        .into_iter()
        .map(|h| h.join().expect("worker panicked").expect("create failed"))
        .collect();
    numbers.sort_unstable();

    assert_eq!(numbers, (2..=9).collect::<Vec<u64>>());
    assert_eq!(active_count(&vault, "shop", "main"), 1);
}

// =============================================================================
// Rollback
// =============================================================================

#[test]
fn test_rollback_never_mutates_earlier_versions() {
    let vault = vault();
    let v1 = vault
        .create_version("shop", "main", &records(json!([{"id": 1, "price": 10}])), &CreateOptions::default(), &crawler())
        .unwrap();
    let v2 = vault
        .create_version(
            "shop",
            "main",
            &records(json!([{"id": 1, "price": 12}])),
            &CreateOptions::of_type(VersionType::Incremental),
            &crawler(),
        )
        .unwrap();
    let v3 = vault
        .create_version(
            "shop",
            "main",
            &records(json!([{"id": 1, "price": 999}])),
            &CreateOptions::of_type(VersionType::Delta),
            &crawler(),
        )
        .unwrap();

    let before_v1 = vault.get_version(&v1.version_id).unwrap();
    let before_v2 = vault.get_version(&v2.version_id).unwrap();
    let before_v1_data = vault.materialize(&v1.version_id).unwrap();
    let before_v2_data = vault.materialize(&v2.version_id).unwrap();

    let v4 = vault
        .rollback_to_version("shop", &v2.version_id, &Actor::user("ops"), "price glitch")
        .unwrap();

    assert_eq!(v4.version_number, 4);
    assert_eq!(v4.version_type, VersionType::Full);
    assert!(v4.has_tag("rollback"));
    assert_eq!(vault.materialize(&v4.version_id).unwrap(), before_v2_data);

    // Targets and everything created before the call are unchanged
    assert_eq!(vault.get_version(&v1.version_id).unwrap(), before_v1);
    assert_eq!(vault.get_version(&v2.version_id).unwrap(), before_v2);
    assert_eq!(vault.materialize(&v1.version_id).unwrap(), before_v1_data);
    assert_eq!(vault.materialize(&v2.version_id).unwrap(), before_v2_data);

    // Only the head it replaced changed status
    assert_eq!(vault.get_version(&v3.version_id).unwrap().status, VersionStatus::RolledBack);
    assert_eq!(active_count(&vault, "shop", "main"), 1);

    let rollbacks = vault
        .history()
        .list_entries(&HistoryFilter::for_source("shop").with_action(HistoryAction::Rollback))
        .unwrap();
    assert_eq!(rollbacks.len(), 1);
    assert_eq!(rollbacks[0].actor, "ops");
}

#[test]
fn test_rollback_of_unknown_version_is_audited() {
    let vault = vault();
    let err = vault
        .rollback_to_version("shop", "missing", &crawler(), "oops")
        .unwrap_err();
    assert!(matches!(err, VaultError::NotFound(_)));

    let failures = vault.history().list_failures(Some("shop"), None).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].action, HistoryAction::Rollback);
}

// =============================================================================
// Concrete scenarios
// =============================================================================

#[test]
fn test_delta_version_materializes_full_dataset() {
    let vault = vault();
    vault
        .create_version("shop", "main", &records(json!([{"id": 1, "title": "a"}])), &CreateOptions::default(), &crawler())
        .unwrap();
    let v2 = vault
        .create_version(
            "shop",
            "main",
            &records(json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}])),
            &CreateOptions::of_type(VersionType::Delta),
            &crawler(),
        )
        .unwrap();

    assert_eq!(v2.version_type, VersionType::Delta);
    assert_eq!(
        vault.materialize(&v2.version_id).unwrap(),
        records(json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}]))
    );
}

#[test]
fn test_branch_numbers_independently() {
    let vault = vault();
    let v1 = vault
        .create_version("shop", "main", &records(json!([{"id": 1}])), &CreateOptions::default(), &crawler())
        .unwrap();
    let v2 = vault
        .create_version(
            "shop",
            "main",
            &records(json!([{"id": 1}, {"id": 2}])),
            &CreateOptions::of_type(VersionType::Delta),
            &crawler(),
        )
        .unwrap();

    let root = vault.create_branch("shop", &v1.version_id, "experiment", &crawler()).unwrap();
    assert_eq!(root.version_number, 1);
    assert_eq!(root.branch, "experiment");
    assert_eq!(vault.materialize(&root.version_id).unwrap(), records(json!([{"id": 1}])));

    let next = vault
        .create_version(
            "shop",
            "experiment",
            &records(json!([{"id": 1}, {"id": 3}])),
            &CreateOptions::of_type(VersionType::Incremental),
            &crawler(),
        )
        .unwrap();
    assert_eq!(next.version_number, 2);

    let main_head = vault.get_active_version("shop", "main").unwrap().unwrap();
    assert_eq!(main_head.version_id, v2.version_id);
    assert_eq!(active_count(&vault, "shop", "experiment"), 1);

    let lineage: Vec<String> = vault
        .get_lineage(&next.version_id)
        .unwrap()
        .into_iter()
        .map(|v| v.version_id)
        .collect();
    assert_eq!(lineage, vec![next.version_id, root.version_id, v1.version_id]);
}

#[test]
fn test_tag_lookup_returns_latest() {
    let vault = vault();
    let v1 = vault
        .create_version("shop", "main", &[], &CreateOptions::default().with_tag("nightly"), &crawler())
        .unwrap();
    let v2 = vault
        .create_version("shop", "main", &[], &CreateOptions::default().with_tag("nightly"), &crawler())
        .unwrap();

    assert_eq!(
        vault.get_version_by_tag("shop", "nightly", None).unwrap().version_id,
        v2.version_id
    );
    vault.remove_tag(&v2.version_id, "nightly", &crawler()).unwrap();
    assert_eq!(
        vault.get_version_by_tag("shop", "nightly", Some("main")).unwrap().version_id,
        v1.version_id
    );
}

// =============================================================================
// Repeated keys
// =============================================================================

#[test]
fn test_repeated_keyless_rows_survive_incremental_versions() {
    let vault = vault();
    vault
        .create_version("shop", "main", &records(json!([{"title": "x"}])), &CreateOptions::default(), &crawler())
        .unwrap();

    let doubled = records(json!([{"title": "x"}, {"title": "x"}]));
    let v2 = vault
        .create_version("shop", "main", &doubled, &CreateOptions::of_type(VersionType::Incremental), &crawler())
        .unwrap();
    assert_eq!(vault.materialize(&v2.version_id).unwrap(), doubled);

    // Later deltas still build on the head
    let tripled = records(json!([{"title": "x"}, {"id": 1, "t": "a"}, {"title": "x"}, {"id": 1, "t": "b"}]));
    let v3 = vault
        .create_version("shop", "main", &tripled, &CreateOptions::of_type(VersionType::Delta), &crawler())
        .unwrap();
    assert_eq!(vault.materialize(&v3.version_id).unwrap(), tripled);
    assert!(vault.verify_version(&v3.version_id).unwrap().valid);
}

// =============================================================================
// Refused commits
// =============================================================================

/// Memory store whose `commit_version` can be told to refuse
struct RefusingStore {
    inner: MemoryStore,
    refuse: AtomicBool,
    inserted: Mutex<Vec<Snapshot>>,
}

impl RefusingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            refuse: AtomicBool::new(false),
            inserted: Mutex::new(Vec::new()),
        }
    }
}

impl VaultStore for RefusingStore {
    fn get_version(&self, version_id: &str) -> VaultResult<Option<Version>> {
        self.inner.get_version(version_id)
    }

    fn query_versions(&self, filter: &VersionFilter) -> VaultResult<Vec<Version>> {
        self.inner.query_versions(filter)
    }

    fn commit_version(&self, version: &Version, supersede: Option<&Supersede>) -> VaultResult<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(VaultError::conflict("head moved"));
        }
        self.inner.commit_version(version, supersede)
    }

    fn update_version_tags(&self, version_id: &str, tags: &BTreeSet<String>) -> VaultResult<()> {
        self.inner.update_version_tags(version_id, tags)
    }

    fn transition_version(&self, version_id: &str, from: VersionStatus, to: VersionStatus) -> VaultResult<bool> {
        self.inner.transition_version(version_id, from, to)
    }

    fn get_snapshot(&self, snapshot_id: &str) -> VaultResult<Option<Snapshot>> {
        self.inner.get_snapshot(snapshot_id)
    }

    fn query_snapshots(&self, filter: &SnapshotFilter) -> VaultResult<Vec<Snapshot>> {
        self.inner.query_snapshots(filter)
    }

    fn insert_snapshot(&self, snapshot: &Snapshot, blob: &[u8]) -> VaultResult<()> {
        self.inserted.lock().unwrap().push(snapshot.clone());
        self.inner.insert_snapshot(snapshot, blob)
    }

    fn set_snapshot_status(&self, snapshot_id: &str, status: SnapshotStatus) -> VaultResult<()> {
        self.inner.set_snapshot_status(snapshot_id, status)
    }

    fn remove_snapshot(&self, snapshot_id: &str) -> VaultResult<Option<u64>> {
        self.inner.remove_snapshot(snapshot_id)
    }

    fn get_blob(&self, key: &str) -> VaultResult<Option<Vec<u8>>> {
        self.inner.get_blob(key)
    }

    fn append_history(&self, entry: &HistoryEntry) -> VaultResult<()> {
        self.inner.append_history(entry)
    }

    fn query_history(&self, filter: &HistoryFilter) -> VaultResult<Vec<HistoryEntry>> {
        self.inner.query_history(filter)
    }

    fn delete_history(&self, entry_ids: &[Uuid]) -> VaultResult<usize> {
        self.inner.delete_history(entry_ids)
    }
}

#[test]
fn test_refused_commit_discards_snapshot_and_audits_once() {
    let store = Arc::new(RefusingStore::new());
    let vault = VersionManager::new(store.clone(), VaultConfig::default()).unwrap();
    let v1 = vault
        .create_version("shop", "main", &records(json!([{"id": 1}])), &CreateOptions::default(), &crawler())
        .unwrap();

    store.refuse.store(true, Ordering::SeqCst);
    let err = vault
        .create_version(
            "shop",
            "main",
            &records(json!([{"id": 1}, {"id": 2, "title": "only in the refused crawl"}])),
            &CreateOptions::default(),
            &crawler(),
        )
        .unwrap_err();
    assert!(matches!(err, VaultError::Conflict(_)));

    // The snapshot written for the refused version is gone, blob included
    let refused = store.inserted.lock().unwrap().last().cloned().unwrap();
    assert_ne!(refused.version_id, v1.version_id);
    assert!(store.get_snapshot(&refused.snapshot_id).unwrap().is_none());
    assert!(store.get_blob(&refused.blob_key()).unwrap().is_none());
    let remaining = store.query_snapshots(&SnapshotFilter::for_source("shop")).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].snapshot_id, v1.snapshot_id);

    // The branch is exactly as before
    assert_eq!(active_count(&vault, "shop", "main"), 1);
    assert_eq!(
        vault.get_active_version("shop", "main").unwrap().unwrap().version_id,
        v1.version_id
    );
    assert_eq!(vault.list_versions(&VersionFilter::for_branch("shop", "main")).unwrap().len(), 1);

    let creates = vault
        .history()
        .list_entries(&HistoryFilter::for_source("shop").with_action(HistoryAction::Create))
        .unwrap();
    assert_eq!(creates.len(), 2);
    let failed: Vec<_> = creates.iter().filter(|e| !e.success).collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error_message.is_some());

    // Once the store accepts again the number is reused, not skipped
    store.refuse.store(false, Ordering::SeqCst);
    let v2 = vault
        .create_version("shop", "main", &records(json!([{"id": 2}])), &CreateOptions::default(), &crawler())
        .unwrap();
    assert_eq!(v2.version_number, 2);
}
