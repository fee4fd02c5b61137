//! recordvault - versioned storage for scraped record collections
//!
//! Every stored dataset becomes an immutable, numbered [`version::Version`]
//! on a branch of its source. Payloads are kept as FULL snapshots or as
//! deltas replayed on top of one, each change is diffed at record and
//! field level, and every lifecycle action lands in an audit trail.
//!
//! Building blocks:
//! - [`version::VersionManager`]: numbering, rollback, branches, tags
//! - [`snapshot::SnapshotManager`]: payload storage, chains, retention
//! - [`diff::DiffEngine`]: keyed comparison, patches, anomalies
//! - [`history::HistoryTracker`]: audit entries and aggregates
//! - [`storage`]: the persistence contract plus memory and journaled stores

pub mod cache;
pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod history;
pub mod lock;
pub mod record;
pub mod snapshot;
pub mod storage;
pub mod version;

pub use config::VaultConfig;
pub use error::{VaultError, VaultResult};
pub use record::Record;
pub use storage::{FileStore, MemoryStore, VaultStore};
pub use version::{CreateOptions, VersionManager};
