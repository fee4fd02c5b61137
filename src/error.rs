//! Error taxonomy for the versioning engine
//!
//! Every public operation returns [`VaultResult`]. Error codes are stable
//! strings so callers (API, CLI) can map them without matching on messages.
//!
//! Propagation rules:
//! - Validation, not-found and conflict errors surface immediately
//! - Storage errors are retryable by the caller; the engine never loops
//! - Chain and integrity errors are fatal for the single operation

use thiserror::Error;

/// Result type for versioning operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Unified error type
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultError {
    /// Bad input: unknown branch, field, empty identifier
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing version, snapshot or source
    #[error("Not found: {0}")]
    NotFound(String),

    /// Branch already exists, concurrent ACTIVE collision, lock timeout
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Snapshot ancestry does not reach a FULL snapshot
    #[error("Snapshot chain broken at {snapshot_id}: missing {missing}")]
    ChainBroken { snapshot_id: String, missing: String },

    /// Snapshot ancestry exceeds the configured hop limit
    #[error("Snapshot chain for {snapshot_id} exceeds {max_hops} hops")]
    ChainTooLong { snapshot_id: String, max_hops: usize },

    /// Persistence collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Hash mismatch or undecodable payload
    #[error("Integrity error: {0}")]
    Integrity(String),
}

impl VaultError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    /// Lock poisoning is reported as a storage failure
    pub(crate) fn poisoned() -> Self {
        Self::Storage("Lock poisoned".to_string())
    }

    /// Stable error code for API and CLI responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VAULT_VALIDATION",
            Self::NotFound(_) => "VAULT_NOT_FOUND",
            Self::Conflict(_) => "VAULT_CONFLICT",
            Self::ChainBroken { .. } => "VAULT_CHAIN_BROKEN",
            Self::ChainTooLong { .. } => "VAULT_CHAIN_TOO_LONG",
            Self::Storage(_) => "VAULT_STORAGE",
            Self::Integrity(_) => "VAULT_INTEGRITY",
        }
    }

    /// Only collaborator I/O failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Corrupted ancestry or payloads; never masked with partial data
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ChainBroken { .. } | Self::ChainTooLong { .. } | Self::Integrity(_)
        )
    }
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("Serialization failed: {}", err))
    }
}
