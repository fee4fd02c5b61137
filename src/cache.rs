//! Metadata read-through cache
//!
//! Holds `Version` and `Snapshot` rows by id. The store stays the source
//! of truth: every write path calls the matching `invalidate_*` before
//! returning, only readers admit rows (guarded by a [`ReadTicket`]), and
//! a full cache simply stops admitting new entries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::Serialize;

use crate::error::{VaultError, VaultResult};
use crate::snapshot::Snapshot;
use crate::version::Version;

/// Cache statistics; passive only
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Insertions skipped because the cache was full
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Proof that a store read started after a given point
///
/// Taken before reading a row from the store and handed back when
/// admitting it. Any invalidation of the same table in between makes the
/// admission a no-op, so a row read before a write can never be cached
/// after that write's invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTicket(u64);

#[derive(Debug)]
struct Table<T> {
    rows: HashMap<String, T>,
    /// Bumped by every invalidation
    epoch: u64,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            epoch: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct MetadataCache {
    versions: RwLock<Table<Version>>,
    snapshots: RwLock<Table<Snapshot>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MetadataCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Default::default()
        }
    }

    /// A cache that never stores anything
    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_entries > 0
    }

    fn lookup<T: Clone>(&self, table: &RwLock<Table<T>>, id: &str) -> VaultResult<Option<T>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let table = table.read().map_err(|_| VaultError::poisoned())?;
        let found = table.rows.get(id).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(found)
    }

    fn ticket<T>(table: &RwLock<Table<T>>) -> VaultResult<ReadTicket> {
        let table = table.read().map_err(|_| VaultError::poisoned())?;
        Ok(ReadTicket(table.epoch))
    }

    fn admit<T>(
        &self,
        table: &RwLock<Table<T>>,
        id: &str,
        value: T,
        ticket: ReadTicket,
    ) -> VaultResult<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }
        let mut table = table.write().map_err(|_| VaultError::poisoned())?;
        if table.epoch != ticket.0 {
            return Ok(false);
        }
        if !table.rows.contains_key(id) && table.rows.len() >= self.max_entries {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        table.rows.insert(id.to_string(), value);
        Ok(true)
    }

    fn drop_key<T>(table: &RwLock<Table<T>>, id: &str) -> VaultResult<()> {
        let mut table = table.write().map_err(|_| VaultError::poisoned())?;
        table.rows.remove(id);
        table.epoch += 1;
        Ok(())
    }

    pub fn get_version(&self, version_id: &str) -> VaultResult<Option<Version>> {
        self.lookup(&self.versions, version_id)
    }

    pub fn version_ticket(&self) -> VaultResult<ReadTicket> {
        Self::ticket(&self.versions)
    }

    /// Admit a row read from the store after `ticket` was taken
    pub fn put_version(&self, version: &Version, ticket: ReadTicket) -> VaultResult<bool> {
        self.admit(&self.versions, &version.version_id, version.clone(), ticket)
    }

    pub fn invalidate_version(&self, version_id: &str) -> VaultResult<()> {
        Self::drop_key(&self.versions, version_id)
    }

    pub fn get_snapshot(&self, snapshot_id: &str) -> VaultResult<Option<Snapshot>> {
        self.lookup(&self.snapshots, snapshot_id)
    }

    pub fn snapshot_ticket(&self) -> VaultResult<ReadTicket> {
        Self::ticket(&self.snapshots)
    }

    pub fn put_snapshot(&self, snapshot: &Snapshot, ticket: ReadTicket) -> VaultResult<bool> {
        self.admit(&self.snapshots, &snapshot.snapshot_id, snapshot.clone(), ticket)
    }

    pub fn invalidate_snapshot(&self, snapshot_id: &str) -> VaultResult<()> {
        Self::drop_key(&self.snapshots, snapshot_id)
    }

    pub fn clear(&self) -> VaultResult<()> {
        let mut versions = self.versions.write().map_err(|_| VaultError::poisoned())?;
        versions.rows.clear();
        versions.epoch += 1;
        drop(versions);

        let mut snapshots = self.snapshots.write().map_err(|_| VaultError::poisoned())?;
        snapshots.rows.clear();
        snapshots.epoch += 1;
        Ok(())
    }

    pub fn stats(&self) -> VaultResult<CacheStats> {
        let entries = self.versions.read().map_err(|_| VaultError::poisoned())?.rows.len()
            + self.snapshots.read().map_err(|_| VaultError::poisoned())?.rows.len();
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{VersionStatus, VersionType, DEFAULT_BRANCH};
    use chrono::Utc;
    use serde_json::Map;
    use std::collections::BTreeSet;

    fn version(id: &str) -> Version {
        Version {
            version_id: id.to_string(),
            source_id: "news".into(),
            branch: DEFAULT_BRANCH.into(),
            version_number: 1,
            parent_version_id: None,
            version_type: VersionType::Full,
            status: VersionStatus::Active,
            record_count: 0,
            data_hash: String::new(),
            size_bytes: 0,
            snapshot_id: "s".into(),
            tags: BTreeSet::new(),
            created_at: Utc::now(),
            created_by: "test".into(),
            description: String::new(),
            changes_summary: Map::new(),
        }
    }

    #[test]
    fn test_hit_miss_and_invalidate() {
        let cache = MetadataCache::new(10);
        assert!(cache.get_version("a").unwrap().is_none());
        let ticket = cache.version_ticket().unwrap();
        assert!(cache.put_version(&version("a"), ticket).unwrap());
        assert!(cache.get_version("a").unwrap().is_some());
        cache.invalidate_version("a").unwrap();
        assert!(cache.get_version("a").unwrap().is_none());

        let stats = cache.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_full_cache_skips_insertion() {
        let cache = MetadataCache::new(1);
        let ticket = cache.version_ticket().unwrap();
        cache.put_version(&version("a"), ticket).unwrap();
        assert!(!cache.put_version(&version("b"), ticket).unwrap());
        assert!(cache.get_version("b").unwrap().is_none());
        assert_eq!(cache.stats().unwrap().evictions, 1);
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = MetadataCache::disabled();
        let ticket = cache.version_ticket().unwrap();
        cache.put_version(&version("a"), ticket).unwrap();
        assert!(cache.get_version("a").unwrap().is_none());
        assert_eq!(cache.stats().unwrap().misses, 0);
    }

    #[test]
    fn test_read_overtaken_by_invalidation_is_not_cached() {
        let cache = MetadataCache::new(10);
        let stale = version("a");

        // Reader takes its ticket and reads the row; a writer then updates
        // the store and invalidates before the reader gets to admit it
        let ticket = cache.version_ticket().unwrap();
        cache.invalidate_version("a").unwrap();

        assert!(!cache.put_version(&stale, ticket).unwrap());
        assert!(cache.get_version("a").unwrap().is_none());

        let fresh_ticket = cache.version_ticket().unwrap();
        assert!(cache.put_version(&stale, fresh_ticket).unwrap());
    }
}
