//! CLI command implementations
//!
//! Every command loads the config, opens the file-backed store, runs one
//! vault operation and prints one JSON response. Mutating commands record
//! history under the `--actor` name.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tracing::info;

use crate::config::VaultConfig;
use crate::history::{Actor, Granularity, HistoryAction, HistoryFilter};
use crate::storage::FileStore;
use crate::version::{CreateOptions, VersionFilter, VersionManager, VersionStatus, VersionType};

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::{read_records, write_error, write_response};

/// Journal file whose presence marks an initialized data directory
const JOURNAL_FILE: &str = "journal.log";

/// Main CLI entry point
///
/// Parses arguments, dispatches, and prints the error response on failure.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    let result = run_command(&cli);
    if let Err(ref e) = result {
        write_error(e.code(), &e.to_string())?;
    }
    result
}

/// Run one command and write its response
pub fn run_command(cli: &Cli) -> CliResult<()> {
    if let Command::Init = cli.command {
        return init(&cli.config);
    }

    let vault = open_vault(&cli.config)?;
    let actor = Actor::user(cli.actor.as_str());
    let data = execute(&vault, &actor, &cli.command)?;
    write_response(data)
}

fn to_json<T: serde::Serialize>(value: &T) -> CliResult<Value> {
    serde_json::to_value(value).map_err(|e| CliError::Vault(e.into()))
}

fn load_config(config_path: &Path) -> CliResult<VaultConfig> {
    VaultConfig::load(config_path).map_err(|e| CliError::config(config_path, e))
}

fn is_initialized(data_dir: &Path) -> bool {
    data_dir.join(JOURNAL_FILE).exists()
}

/// Create the data directory and an empty journal
///
/// A missing config file is written with defaults first.
pub fn init(config_path: &Path) -> CliResult<()> {
    let config = if config_path.exists() {
        load_config(config_path)?
    } else {
        let config = VaultConfig::default();
        config
            .save(config_path)
            .map_err(|e| CliError::config(config_path, e))?;
        config
    };

    if is_initialized(&config.data_dir) {
        return Err(CliError::AlreadyInitialized(config.data_dir.clone()));
    }
    FileStore::open(&config.data_dir)?;

    info!(
        event = "VAULT_INITIALIZED",
        data_dir = %config.data_dir.display(),
        "Data directory initialized"
    );
    write_response(json!({
        "initialized": true,
        "data_dir": config.data_dir.display().to_string(),
    }))
}

/// Load config, replay the journal and build the vault
fn open_vault(config_path: &Path) -> CliResult<VersionManager> {
    let config = load_config(config_path)?;
    if !is_initialized(&config.data_dir) {
        return Err(CliError::NotInitialized(config.data_dir.clone()));
    }
    let store = FileStore::open(&config.data_dir)?;
    Ok(VersionManager::new(Arc::new(store), config)?)
}

fn execute(vault: &VersionManager, actor: &Actor, command: &Command) -> CliResult<Value> {
    match command {
        Command::Init => Err(CliError::AlreadyInitialized(vault.config().data_dir.clone())),

        Command::CreateVersion {
            source,
            branch,
            version_type,
            description,
            tags,
            records,
            key_field,
        } => {
            let version_type: VersionType = version_type.parse()?;
            let mut options = CreateOptions::of_type(version_type).with_description(description.as_str());
            for tag in tags {
                options = options.with_tag(tag.as_str());
            }
            if let Some(key_field) = key_field {
                options = options.keyed_by(key_field.as_str());
            }
            let records = read_records(records.as_deref())?;
            let version = vault.create_version(source, branch, &records, &options, actor)?;
            to_json(&version)
        }

        Command::Materialize { version } => {
            let records = vault.materialize(version)?;
            Ok(json!({ "version_id": version, "count": records.len(), "records": records }))
        }

        Command::Rollback {
            source,
            version,
            reason,
        } => to_json(&vault.rollback_to_version(source, version, actor, reason)?),

        Command::Branch { source, from, name } => {
            to_json(&vault.create_branch(source, from, name, actor)?)
        }

        Command::Tag { version, tag } => to_json(&vault.add_tag(version, tag, actor)?),

        Command::Untag { version, tag } => to_json(&vault.remove_tag(version, tag, actor)?),

        Command::Purge { version, reason } => to_json(&vault.purge_version(version, actor, reason)?),

        Command::Verify { version } => to_json(&vault.verify_version(version)?),

        Command::Diff {
            from,
            to,
            key_field,
            summary,
        } => {
            let diff = vault.compare_versions(from, to, key_field.as_deref())?;
            if *summary {
                to_json(&diff.summary())
            } else {
                to_json(&diff)
            }
        }

        Command::Versions {
            source,
            branch,
            status,
            tag,
            include_deleted,
            limit,
        } => {
            let filter = VersionFilter {
                source_id: Some(source.clone()),
                branch: branch.clone(),
                status: status.as_deref().map(str::parse::<VersionStatus>).transpose()?,
                tag: tag.clone(),
                include_deleted: *include_deleted,
                limit: *limit,
                ..Default::default()
            };
            to_json(&vault.list_versions(&filter)?)
        }

        Command::Branches { source } => to_json(&vault.list_branches(source)?),

        Command::History {
            source,
            version,
            action,
            search,
            failures,
            limit,
        } => {
            let filter = HistoryFilter {
                source_id: source.clone(),
                version_id: version.clone(),
                action: action.as_deref().map(str::parse::<HistoryAction>).transpose()?,
                keyword: search.clone(),
                success: if *failures { Some(false) } else { None },
                limit: Some(*limit),
                ..Default::default()
            };
            to_json(&vault.history().list_entries(&filter)?)
        }

        Command::HistoryStats {
            source,
            days,
            granularity,
        } => {
            let granularity: Granularity = granularity.parse()?;
            let now = Utc::now();
            let since = now - Duration::days(i64::from(*days));
            let history = vault.history();
            Ok(json!({
                "stats": to_json(&history.get_stats(source.as_deref(), Some((since, now)))?)?,
                "timeline": to_json(&history.get_activity_timeline(source.as_deref(), *days, granularity)?)?,
                "top_actors": to_json(&history.get_top_actors(source.as_deref(), 5)?)?,
            }))
        }

        Command::SnapshotStats { source } => {
            let snapshots = vault.snapshots();
            Ok(json!({
                "stats": to_json(&snapshots.get_snapshot_stats(source.as_deref())?)?,
                "savings": to_json(&snapshots.calculate_storage_savings(source.as_deref())?)?,
                "cache": to_json(&vault.cache().stats()?)?,
            }))
        }

        Command::CleanupSnapshots { source, dry_run } => to_json(
            &vault
                .snapshots()
                .cleanup_expired_snapshots(source.as_deref(), *dry_run, actor)?,
        ),

        Command::CleanupHistory {
            retention_days,
            dry_run,
            include_failures,
        } => {
            let retention = retention_days.unwrap_or(vault.config().history_retention_days);
            to_json(&vault.history().cleanup_before(
                Utc::now(),
                retention,
                *dry_run,
                *include_failures,
            )?)
        }
    }
}
