//! CLI error type
//!
//! Vault errors pass through with their own codes. The CLI only adds the
//! failures that happen around a vault call: config, data directory
//! state, and terminal I/O. Each error also picks a process exit status
//! so schedulers can tell "retry later" from "data is damaged".

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::error::VaultError;

/// Anything not covered below
pub const EXIT_FAILURE: i32 = 1;
/// Damaged journal, chain or payload (sysexits EX_DATAERR)
pub const EXIT_DATA: i32 = 65;
/// Busy branch or data directory, storage hiccup (sysexits EX_TEMPFAIL)
pub const EXIT_RETRY: i32 = 75;
/// Unreadable or invalid config (sysexits EX_CONFIG)
pub const EXIT_CONFIG: i32 = 78;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Config {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("Data directory {0} is already initialized")]
    AlreadyInitialized(PathBuf),

    #[error("Data directory {0} is not initialized; run `recordvault init` first")]
    NotInitialized(PathBuf),

    /// Record input could not be read or parsed
    #[error("Input: {0}")]
    Input(String),

    /// Response could not be written to stdout
    #[error("Output: {0}")]
    Output(#[source] io::Error),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

impl CliError {
    pub fn config(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Config {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Stable code printed in the error response
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "VAULT_CLI_CONFIG",
            Self::AlreadyInitialized(_) => "VAULT_CLI_ALREADY_INITIALIZED",
            Self::NotInitialized(_) => "VAULT_CLI_NOT_INITIALIZED",
            Self::Input(_) => "VAULT_CLI_INPUT",
            Self::Output(_) => "VAULT_CLI_OUTPUT",
            Self::Vault(e) => e.code(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => EXIT_CONFIG,
            Self::Vault(e) if e.is_fatal() => EXIT_DATA,
            Self::Vault(e) if e.is_retryable() => EXIT_RETRY,
            Self::Vault(VaultError::Conflict(_)) => EXIT_RETRY,
            _ => EXIT_FAILURE,
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_errors_keep_their_code() {
        let err = CliError::from(VaultError::conflict("branch main is busy"));
        assert_eq!(err.code(), "VAULT_CONFLICT");
        assert!(err.to_string().contains("busy"));
        assert_eq!(err.exit_code(), EXIT_RETRY);
    }

    #[test]
    fn test_exit_codes_separate_damage_from_bad_input() {
        assert_eq!(CliError::from(VaultError::integrity("bad hash")).exit_code(), EXIT_DATA);
        assert_eq!(CliError::from(VaultError::storage("disk full")).exit_code(), EXIT_RETRY);
        assert_eq!(CliError::from(VaultError::validation("bad tag")).exit_code(), EXIT_FAILURE);
        assert_eq!(CliError::config("vault.json", "missing field").exit_code(), EXIT_CONFIG);
        assert_eq!(CliError::input("empty").exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_not_initialized_names_the_directory() {
        let err = CliError::NotInitialized(PathBuf::from("/var/lib/vault"));
        assert_eq!(err.code(), "VAULT_CLI_NOT_INITIALIZED");
        assert!(err.to_string().contains("/var/lib/vault"));
    }
}
