//! Snapshot chain resolution
//!
//! A chain is walked backwards from the target through predecessor ids
//! until a FULL snapshot is reached. The walk is an iterative loop over
//! rows addressed by id with an explicit hop limit, so a corrupted
//! pointer (or a cycle) fails fast instead of looping.

use std::collections::{HashMap, HashSet};

use super::types::{Snapshot, SnapshotStatus, SnapshotType};
use crate::error::{VaultError, VaultResult};

/// Walk from `snapshot_id` back to its FULL root; returns the chain oldest first
pub fn resolve<F>(snapshot_id: &str, max_hops: usize, mut lookup: F) -> VaultResult<Vec<Snapshot>>
where
    F: FnMut(&str) -> VaultResult<Option<Snapshot>>,
{
    let target = lookup(snapshot_id)?
        .ok_or_else(|| VaultError::not_found(format!("Snapshot {}", snapshot_id)))?;

    let mut chain = vec![target];
    loop {
        let current = &chain[chain.len() - 1];
        if current.snapshot_type == SnapshotType::Full {
            break;
        }
        if chain.len() > max_hops {
            return Err(VaultError::ChainTooLong {
                snapshot_id: snapshot_id.to_string(),
                max_hops,
            });
        }
        let predecessor_id = match current.predecessor() {
            Some(id) => id.to_string(),
            None => {
                return Err(VaultError::ChainBroken {
                    snapshot_id: snapshot_id.to_string(),
                    missing: format!("predecessor of {}", current.snapshot_id),
                })
            }
        };
        match lookup(&predecessor_id)? {
            Some(predecessor) => chain.push(predecessor),
            None => {
                return Err(VaultError::ChainBroken {
                    snapshot_id: snapshot_id.to_string(),
                    missing: predecessor_id,
                })
            }
        }
    }

    chain.reverse();
    Ok(chain)
}

/// Ids of every snapshot some member of `dependents` replays on top of
///
/// Walks are bounded by `max_hops`; a broken walk simply stops.
pub fn ancestors_of<'a, I>(dependents: I, rows: &HashMap<&str, &Snapshot>, max_hops: usize) -> HashSet<String>
where
    I: IntoIterator<Item = &'a Snapshot>,
{
    let mut required = HashSet::new();
    for snapshot in dependents {
        let mut current = snapshot;
        for _ in 0..max_hops {
            let Some(predecessor) = current.predecessor() else {
                break;
            };
            if !required.insert(predecessor.to_string()) {
                // Everything above was already marked by an earlier walk
                break;
            }
            match rows.get(predecessor) {
                Some(next) => current = next,
                None => break,
            }
        }
    }
    required
}

/// Snapshots that a live (non-DELETED, not `reclaimable`) snapshot depends on
pub fn required_ancestors(
    snapshots: &[Snapshot],
    reclaimable: &HashSet<String>,
    max_hops: usize,
) -> HashSet<String> {
    let rows: HashMap<&str, &Snapshot> = snapshots
        .iter()
        .map(|s| (s.snapshot_id.as_str(), s))
        .collect();
    let live = snapshots.iter().filter(|s| {
        s.status != SnapshotStatus::Deleted && !reclaimable.contains(&s.snapshot_id)
    });
    ancestors_of(live, &rows, max_hops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::types::Compression;
    use chrono::Utc;

    fn snap(id: &str, snapshot_type: SnapshotType, predecessor: Option<&str>) -> Snapshot {
        let now = Utc::now();
        Snapshot {
            snapshot_id: id.to_string(),
            source_id: "news".into(),
            version_id: format!("v-{}", id),
            snapshot_type,
            status: SnapshotStatus::Active,
            record_count: 0,
            original_size: 0,
            compressed_size: 0,
            compression: Compression::None,
            data_hash: String::new(),
            payload_hash: String::new(),
            dataset_size: 0,
            parent_snapshot_id: match snapshot_type {
                SnapshotType::Incremental => predecessor.map(str::to_string),
                _ => None,
            },
            base_snapshot_id: match snapshot_type {
                SnapshotType::Differential => predecessor.map(str::to_string),
                _ => None,
            },
            chain_depth: 0,
            created_at: now,
            expires_at: now,
        }
    }

    fn lookup_in(rows: Vec<Snapshot>) -> impl FnMut(&str) -> VaultResult<Option<Snapshot>> {
        let map: HashMap<String, Snapshot> =
            rows.into_iter().map(|s| (s.snapshot_id.clone(), s)).collect();
        move |id| Ok(map.get(id).cloned())
    }

    fn ids(chain: &[Snapshot]) -> Vec<&str> {
        chain.iter().map(|s| s.snapshot_id.as_str()).collect()
    }

    #[test]
    fn test_full_chain_is_itself() {
        let chain = resolve("a", 5, lookup_in(vec![snap("a", SnapshotType::Full, None)])).unwrap();
        assert_eq!(ids(&chain), vec!["a"]);
    }

    #[test]
    fn test_mixed_chain_oldest_first() {
        let rows = vec![
            snap("a", SnapshotType::Full, None),
            snap("b", SnapshotType::Incremental, Some("a")),
            snap("c", SnapshotType::Incremental, Some("b")),
            snap("d", SnapshotType::Differential, Some("a")),
        ];
        let chain = resolve("c", 5, lookup_in(rows.clone())).unwrap();
        assert_eq!(ids(&chain), vec!["a", "b", "c"]);
        let chain = resolve("d", 5, lookup_in(rows)).unwrap();
        assert_eq!(ids(&chain), vec!["a", "d"]);
    }

    #[test]
    fn test_missing_link_is_chain_broken() {
        let rows = vec![snap("c", SnapshotType::Incremental, Some("b"))];
        let err = resolve("c", 5, lookup_in(rows)).unwrap_err();
        assert_eq!(
            err,
            VaultError::ChainBroken {
                snapshot_id: "c".into(),
                missing: "b".into()
            }
        );
    }

    #[test]
    fn test_cycle_hits_hop_limit() {
        let rows = vec![
            snap("x", SnapshotType::Incremental, Some("y")),
            snap("y", SnapshotType::Incremental, Some("x")),
        ];
        let err = resolve("x", 10, lookup_in(rows)).unwrap_err();
        assert_eq!(err.code(), "VAULT_CHAIN_TOO_LONG");
    }

    #[test]
    fn test_depth_at_limit_is_allowed() {
        let rows = vec![
            snap("a", SnapshotType::Full, None),
            snap("b", SnapshotType::Incremental, Some("a")),
            snap("c", SnapshotType::Incremental, Some("b")),
        ];
        assert!(resolve("c", 2, lookup_in(rows.clone())).is_ok());
        assert!(resolve("c", 1, lookup_in(rows)).is_err());
    }

    #[test]
    fn test_required_ancestors_skip_reclaimable() {
        let mut deleted = snap("e", SnapshotType::Incremental, Some("c"));
        deleted.status = SnapshotStatus::Deleted;
        let rows = vec![
            snap("a", SnapshotType::Full, None),
            snap("b", SnapshotType::Incremental, Some("a")),
            snap("c", SnapshotType::Full, None),
            deleted,
        ];
        let required = required_ancestors(&rows, &HashSet::new(), 10);
        assert!(required.contains("a"));
        assert!(!required.contains("c"));

        let reclaimable: HashSet<String> = ["b".to_string()].into_iter().collect();
        assert!(required_ancestors(&rows, &reclaimable, 10).is_empty());
    }
}
