//! Version lineage types

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::VaultError;
use crate::snapshot::SnapshotType;

/// Version identifier (UUID v4 string)
pub type VersionId = String;

/// Branch every source starts on
pub const DEFAULT_BRANCH: &str = "main";

/// Storage strategy of a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionType {
    /// Complete copy of the dataset
    Full,
    /// Changes relative to the last FULL version of the chain
    Delta,
    /// Changes relative to the previous version
    Incremental,
}

impl VersionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionType::Full => "FULL",
            VersionType::Delta => "DELTA",
            VersionType::Incremental => "INCREMENTAL",
        }
    }

    pub fn snapshot_type(&self) -> SnapshotType {
        match self {
            VersionType::Full => SnapshotType::Full,
            VersionType::Delta => SnapshotType::Differential,
            VersionType::Incremental => SnapshotType::Incremental,
        }
    }

    pub fn is_delta(&self) -> bool {
        !matches!(self, VersionType::Full)
    }
}

impl fmt::Display for VersionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VersionType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(VersionType::Full),
            "delta" => Ok(VersionType::Delta),
            "incremental" => Ok(VersionType::Incremental),
            other => Err(VaultError::validation(format!("Unknown version type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionStatus {
    Active,
    Archived,
    RolledBack,
    Deleted,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Active => "ACTIVE",
            VersionStatus::Archived => "ARCHIVED",
            VersionStatus::RolledBack => "ROLLED_BACK",
            VersionStatus::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VersionStatus {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(VersionStatus::Active),
            "archived" => Ok(VersionStatus::Archived),
            "rolled_back" => Ok(VersionStatus::RolledBack),
            "deleted" => Ok(VersionStatus::Deleted),
            other => Err(VaultError::validation(format!("Unknown version status: {}", other))),
        }
    }
}

/// An immutable, numbered dataset state of one source on one branch
///
/// Only `status` and `tags` change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub version_id: VersionId,
    pub source_id: String,
    pub branch: String,
    pub version_number: u64,
    pub parent_version_id: Option<VersionId>,
    #[serde(rename = "type")]
    pub version_type: VersionType,
    pub status: VersionStatus,
    pub record_count: u64,
    pub data_hash: String,
    pub size_bytes: u64,
    pub snapshot_id: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub changes_summary: Map<String, Value>,
}

impl Version {
    pub fn is_active(&self) -> bool {
        self.status == VersionStatus::Active
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Status flip applied to the previous head in the same atomic commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supersede {
    pub version_id: VersionId,
    /// ARCHIVED for normal creation, ROLLED_BACK for rollback
    pub status: VersionStatus,
}

/// Read-only version query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionFilter {
    pub source_id: Option<String>,
    pub branch: Option<String>,
    pub status: Option<VersionStatus>,
    pub version_type: Option<VersionType>,
    pub tag: Option<String>,
    /// Include DELETED versions when no explicit status is requested
    #[serde(default)]
    pub include_deleted: bool,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl VersionFilter {
    pub fn for_source(source_id: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            ..Default::default()
        }
    }

    pub fn for_branch(source_id: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            branch: Some(branch.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: VersionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn matches(&self, version: &Version) -> bool {
        if let Some(ref source) = self.source_id {
            if &version.source_id != source {
                return false;
            }
        }
        if let Some(ref branch) = self.branch {
            if &version.branch != branch {
                return false;
            }
        }
        match self.status {
            Some(status) if version.status != status => return false,
            None if !self.include_deleted && version.status == VersionStatus::Deleted => {
                return false
            }
            _ => {}
        }
        if let Some(version_type) = self.version_type {
            if version.version_type != version_type {
                return false;
            }
        }
        if let Some(ref tag) = self.tag {
            if !version.has_tag(tag) {
                return false;
            }
        }
        true
    }

    /// Apply offset and limit to an already ordered result
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// Head information for one branch of a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub branch: String,
    pub version_count: usize,
    pub head_version_number: u64,
    pub active_version_id: Option<VersionId>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(number: u64, status: VersionStatus) -> Version {
        Version {
            version_id: format!("v{}", number),
            source_id: "news".into(),
            branch: DEFAULT_BRANCH.into(),
            version_number: number,
            parent_version_id: None,
            version_type: VersionType::Full,
            status,
            record_count: 0,
            data_hash: String::new(),
            size_bytes: 0,
            snapshot_id: format!("s{}", number),
            tags: BTreeSet::new(),
            created_at: Utc::now(),
            created_by: "test".into(),
            description: String::new(),
            changes_summary: Map::new(),
        }
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(VersionType::Full.snapshot_type(), SnapshotType::Full);
        assert_eq!(VersionType::Delta.snapshot_type(), SnapshotType::Differential);
        assert_eq!(VersionType::Incremental.snapshot_type(), SnapshotType::Incremental);
    }

    #[test]
    fn test_serde_rejects_unknown_type() {
        let mut value = serde_json::to_value(sample(1, VersionStatus::Active)).unwrap();
        assert_eq!(value["type"], "FULL");
        value["type"] = Value::String("full".into());
        assert!(serde_json::from_value::<Version>(value).is_err());
    }

    #[test]
    fn test_filter_hides_deleted_by_default() {
        let filter = VersionFilter::for_source("news");
        assert!(filter.matches(&sample(1, VersionStatus::Archived)));
        assert!(!filter.matches(&sample(2, VersionStatus::Deleted)));
        assert!(filter.clone().including_deleted().matches(&sample(2, VersionStatus::Deleted)));
        assert!(VersionFilter::for_source("news")
            .with_status(VersionStatus::Deleted)
            .matches(&sample(2, VersionStatus::Deleted)));
    }

    #[test]
    fn test_filter_by_tag_and_branch() {
        let mut version = sample(1, VersionStatus::Active);
        version.tags.insert("release".into());
        assert!(VersionFilter::for_branch("news", "main")
            .with_tag("release")
            .matches(&version));
        assert!(!VersionFilter::for_branch("news", "dev").matches(&version));
    }

    #[test]
    fn test_paginate() {
        let filter = VersionFilter {
            limit: Some(2),
            offset: 1,
            ..Default::default()
        };
        assert_eq!(filter.paginate(vec![1, 2, 3, 4]), vec![2, 3]);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("rolled_back".parse::<VersionStatus>().unwrap(), VersionStatus::RolledBack);
        assert!("gone".parse::<VersionStatus>().is_err());
    }
}
