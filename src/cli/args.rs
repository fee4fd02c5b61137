//! CLI argument definitions using clap
//!
//! Commands:
//! - recordvault init
//! - recordvault create-version --source <id> [--type full|delta|incremental]
//! - recordvault materialize --version <id>
//! - recordvault rollback / branch / tag / untag / purge / verify
//! - recordvault diff --from <id> --to <id>
//! - recordvault versions / branches / history / history-stats
//! - recordvault snapshot-stats / cleanup-snapshots / cleanup-history

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// RecordVault - versioned storage for scraped record collections
#[derive(Parser, Debug)]
#[command(name = "recordvault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./recordvault.json")]
    pub config: PathBuf,

    /// Name recorded as the actor in history
    #[arg(long, global = true, default_value = "cli")]
    pub actor: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the data directory (and a default config if none exists)
    Init,

    /// Store a record collection as a new version
    CreateVersion {
        #[arg(long)]
        source: String,

        #[arg(long, default_value = "main")]
        branch: String,

        /// full, delta or incremental
        #[arg(long = "type", default_value = "full")]
        version_type: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long = "tag")]
        tags: Vec<String>,

        /// JSON array of records; stdin when omitted
        #[arg(long)]
        records: Option<PathBuf>,

        #[arg(long)]
        key_field: Option<String>,
    },

    /// Print the full record collection of a version
    Materialize {
        #[arg(long)]
        version: String,
    },

    /// Make a copy of an older version the new head
    Rollback {
        #[arg(long)]
        source: String,

        #[arg(long)]
        version: String,

        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Start a new branch from a version
    Branch {
        #[arg(long)]
        source: String,

        #[arg(long)]
        from: String,

        #[arg(long)]
        name: String,
    },

    Tag {
        #[arg(long)]
        version: String,

        #[arg(long)]
        tag: String,
    },

    Untag {
        #[arg(long)]
        version: String,

        #[arg(long)]
        tag: String,
    },

    /// Mark a non-active version DELETED
    Purge {
        #[arg(long)]
        version: String,

        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Restore a version and check its hash
    Verify {
        #[arg(long)]
        version: String,
    },

    /// Compare two versions
    Diff {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        #[arg(long)]
        key_field: Option<String>,

        /// Only print counts
        #[arg(long)]
        summary: bool,
    },

    /// List versions of a source
    Versions {
        #[arg(long)]
        source: String,

        #[arg(long)]
        branch: Option<String>,

        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        tag: Option<String>,

        #[arg(long)]
        include_deleted: bool,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// List branches of a source
    Branches {
        #[arg(long)]
        source: String,
    },

    /// List history entries, newest first
    History {
        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        version: Option<String>,

        #[arg(long)]
        action: Option<String>,

        #[arg(long)]
        search: Option<String>,

        #[arg(long)]
        failures: bool,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Aggregate history counts, timeline and top actors
    HistoryStats {
        #[arg(long)]
        source: Option<String>,

        #[arg(long, default_value_t = 7)]
        days: u32,

        /// hour, day or week
        #[arg(long, default_value = "day")]
        granularity: String,
    },

    /// Snapshot counts and storage savings
    SnapshotStats {
        #[arg(long)]
        source: Option<String>,
    },

    /// Remove expired snapshots nothing depends on
    CleanupSnapshots {
        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Remove old history entries
    CleanupHistory {
        /// Defaults to history_retention_days from the config
        #[arg(long)]
        retention_days: Option<u32>,

        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        include_failures: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
