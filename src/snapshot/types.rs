//! Snapshot metadata types

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// Snapshot identifier (UUID v4 string)
pub type SnapshotId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotType {
    /// Complete record collection
    Full,
    /// Delta from the previous snapshot
    Incremental,
    /// Delta from the last FULL snapshot
    Differential,
}

impl SnapshotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotType::Full => "FULL",
            SnapshotType::Incremental => "INCREMENTAL",
            SnapshotType::Differential => "DIFFERENTIAL",
        }
    }
}

impl fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SnapshotType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(SnapshotType::Full),
            "incremental" => Ok(SnapshotType::Incremental),
            "differential" => Ok(SnapshotType::Differential),
            other => Err(VaultError::validation(format!("Unknown snapshot type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotStatus {
    Active,
    Archived,
    /// Past retention but still required by a live chain
    Expired,
    Deleted,
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::Active => "ACTIVE",
            SnapshotStatus::Archived => "ARCHIVED",
            SnapshotStatus::Expired => "EXPIRED",
            SnapshotStatus::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Blob encoding, stored next to the metadata and never inside the blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Compression {
    None,
    Gzip,
}

/// Snapshot metadata; the payload lives in the blob store under `payload_hash`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: SnapshotId,
    pub source_id: String,
    pub version_id: String,
    #[serde(rename = "type")]
    pub snapshot_type: SnapshotType,
    pub status: SnapshotStatus,
    /// Records in the materialized dataset
    pub record_count: u64,
    /// Serialized payload size before compression
    pub original_size: u64,
    /// Bytes actually stored
    pub compressed_size: u64,
    pub compression: Compression,
    /// Hash of the materialized dataset
    pub data_hash: String,
    /// Hash of the uncompressed payload; blob key
    pub payload_hash: String,
    /// Canonical size of the materialized dataset
    pub dataset_size: u64,
    pub parent_snapshot_id: Option<SnapshotId>,
    pub base_snapshot_id: Option<SnapshotId>,
    /// Hops to the FULL ancestor (0 for FULL)
    pub chain_depth: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Snapshot {
    /// The snapshot this one is replayed on top of
    pub fn predecessor(&self) -> Option<&str> {
        match self.snapshot_type {
            SnapshotType::Full => None,
            SnapshotType::Incremental => self.parent_snapshot_id.as_deref(),
            SnapshotType::Differential => self.base_snapshot_id.as_deref(),
        }
    }

    /// Blob store key; the encoding is part of the key so equal payloads
    /// stored with different compression never share a blob
    pub fn blob_key(&self) -> String {
        match self.compression {
            Compression::None => self.payload_hash.clone(),
            Compression::Gzip => format!("{}-gz", self.payload_hash),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_live(&self) -> bool {
        matches!(self.status, SnapshotStatus::Active | SnapshotStatus::Archived)
    }

    pub fn compression_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.compressed_size as f64 / self.original_size as f64
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotFilter {
    pub source_id: Option<String>,
    pub version_id: Option<String>,
    pub status: Option<SnapshotStatus>,
    pub snapshot_type: Option<SnapshotType>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl SnapshotFilter {
    pub fn for_source(source_id: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: SnapshotStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_type(mut self, snapshot_type: SnapshotType) -> Self {
        self.snapshot_type = Some(snapshot_type);
        self
    }

    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        self.source_id.as_ref().map_or(true, |s| &snapshot.source_id == s)
            && self.version_id.as_ref().map_or(true, |v| &snapshot.version_id == v)
            && self.status.map_or(true, |s| snapshot.status == s)
            && self.snapshot_type.map_or(true, |t| snapshot.snapshot_type == t)
    }

    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// Options for [`super::SnapshotManager::create_snapshot`]
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    pub compress: bool,
    pub retention_days: u32,
    /// Delta predecessor chosen by the caller instead of the latest ACTIVE one
    pub predecessor: Option<SnapshotId>,
    pub key_field: String,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            compress: true,
            retention_days: 30,
            predecessor: None,
            key_field: "id".to_string(),
        }
    }
}

impl SnapshotOptions {
    pub fn with_predecessor(mut self, snapshot_id: impl Into<SnapshotId>) -> Self {
        self.predecessor = Some(snapshot_id.into());
        self
    }

    pub fn uncompressed(mut self) -> Self {
        self.compress = false;
        self
    }
}

/// Aggregate counts and sizes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub total_snapshots: usize,
    pub by_status: BTreeMap<SnapshotStatus, usize>,
    pub by_type: BTreeMap<SnapshotType, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub total_records: u64,
    pub total_original_size: u64,
    pub total_compressed_size: u64,
    pub compression_ratio: f64,
    pub max_chain_depth: usize,
}

/// Bytes saved by compression and delta storage versus storing every dataset in full
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSavings {
    pub snapshot_count: usize,
    /// Sum of materialized dataset sizes
    pub full_equivalent_bytes: u64,
    /// Sum of uncompressed payload sizes
    pub payload_bytes: u64,
    /// Sum of stored sizes
    pub stored_bytes: u64,
    pub delta_savings_bytes: u64,
    pub compression_savings_bytes: u64,
    pub total_savings_bytes: u64,
    pub savings_percent: f64,
}

/// Outcome of a retention sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    /// Expired snapshots removed (or that would be removed)
    pub deleted: Vec<SnapshotId>,
    /// Expired snapshots kept because a live chain depends on them
    pub retained: Vec<SnapshotId>,
    pub bytes_freed: u64,
}
