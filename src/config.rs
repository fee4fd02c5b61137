//! Vault configuration
//!
//! Loaded from a single JSON file. Every field except `data_dir` has a
//! default, and the loaded value is validated before use.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::diff::AnomalyThresholds;
use crate::error::{VaultError, VaultResult};

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Root directory for the file-backed store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Hop limit for snapshot chain walks
    #[serde(default = "default_max_chain_hops")]
    pub max_chain_hops: usize,

    /// Delta versions deeper than this are promoted to FULL
    #[serde(default = "default_max_delta_chain")]
    pub max_delta_chain: usize,

    /// Payloads at or below this size are stored uncompressed
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold_bytes: usize,

    #[serde(default = "default_true")]
    pub compress_snapshots: bool,

    #[serde(default = "default_snapshot_retention_days")]
    pub snapshot_retention_days: u32,

    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: u32,

    /// 0 disables the metadata cache
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_key_field")]
    pub default_key_field: String,

    #[serde(default = "default_true")]
    pub case_sensitive_diff: bool,

    #[serde(default)]
    pub anomaly: AnomalyThresholds,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./vault-data")
}
fn default_max_chain_hops() -> usize {
    50
}
fn default_max_delta_chain() -> usize {
    10
}
fn default_compression_threshold() -> usize {
    1024
}
fn default_true() -> bool {
    true
}
fn default_snapshot_retention_days() -> u32 {
    30
}
fn default_history_retention_days() -> u32 {
    90
}
fn default_cache_max_entries() -> usize {
    1024
}
fn default_lock_timeout_ms() -> u64 {
    30_000
}
fn default_key_field() -> String {
    "id".to_string()
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_chain_hops: default_max_chain_hops(),
            max_delta_chain: default_max_delta_chain(),
            compression_threshold_bytes: default_compression_threshold(),
            compress_snapshots: true,
            snapshot_retention_days: default_snapshot_retention_days(),
            history_retention_days: default_history_retention_days(),
            cache_max_entries: default_cache_max_entries(),
            lock_timeout_ms: default_lock_timeout_ms(),
            default_key_field: default_key_field(),
            case_sensitive_diff: true,
            anomaly: AnomalyThresholds::default(),
        }
    }
}

impl VaultConfig {
    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> VaultResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            VaultError::validation(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: VaultConfig = serde_json::from_str(&content)
            .map_err(|e| VaultError::validation(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty JSON
    pub fn save(&self, path: &Path) -> VaultResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.max_chain_hops == 0 {
            return Err(VaultError::validation("max_chain_hops must be > 0"));
        }
        if self.max_delta_chain > self.max_chain_hops {
            return Err(VaultError::validation(format!(
                "max_delta_chain ({}) must not exceed max_chain_hops ({})",
                self.max_delta_chain, self.max_chain_hops
            )));
        }
        if self.snapshot_retention_days == 0 {
            return Err(VaultError::validation("snapshot_retention_days must be > 0"));
        }
        if self.history_retention_days == 0 {
            return Err(VaultError::validation("history_retention_days must be > 0"));
        }
        if self.default_key_field.trim().is_empty() {
            return Err(VaultError::validation("default_key_field must not be empty"));
        }
        self.anomaly.validate()?;
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = VaultConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_chain_hops, 50);
        assert_eq!(config.compression_threshold_bytes, 1024);
        assert_eq!(config.default_key_field, "id");
    }

    #[test]
    fn test_load_applies_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recordvault.json");
        fs::write(&path, r#"{"data_dir": "/tmp/vault", "max_delta_chain": 4}"#).unwrap();

        let config = VaultConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/vault"));
        assert_eq!(config.max_delta_chain, 4);
        assert_eq!(config.snapshot_retention_days, 30);
        assert!(config.compress_snapshots);
    }

    #[test]
    fn test_delta_chain_bounded_by_hops() {
        let config = VaultConfig {
            max_chain_hops: 3,
            max_delta_chain: 5,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "VAULT_VALIDATION");
    }

    #[test]
    fn test_invalid_json_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        assert!(VaultConfig::load(&path).is_err());
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.json");
        let config = VaultConfig {
            history_retention_days: 7,
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = VaultConfig::load(&path).unwrap();
        assert_eq!(loaded.history_retention_days, 7);
    }
}
