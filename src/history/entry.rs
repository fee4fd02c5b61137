//! History entry types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::VaultError;

/// Lifecycle action recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    Create,
    Update,
    Delete,
    Rollback,
    Merge,
    Import,
    Export,
    Branch,
    Tag,
    Untag,
    Archive,
    Snapshot,
    Restore,
    Purge,
    Cleanup,
}

impl HistoryAction {
    pub const ALL: [HistoryAction; 15] = [
        HistoryAction::Create,
        HistoryAction::Update,
        HistoryAction::Delete,
        HistoryAction::Rollback,
        HistoryAction::Merge,
        HistoryAction::Import,
        HistoryAction::Export,
        HistoryAction::Branch,
        HistoryAction::Tag,
        HistoryAction::Untag,
        HistoryAction::Archive,
        HistoryAction::Snapshot,
        HistoryAction::Restore,
        HistoryAction::Purge,
        HistoryAction::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Create => "CREATE",
            HistoryAction::Update => "UPDATE",
            HistoryAction::Delete => "DELETE",
            HistoryAction::Rollback => "ROLLBACK",
            HistoryAction::Merge => "MERGE",
            HistoryAction::Import => "IMPORT",
            HistoryAction::Export => "EXPORT",
            HistoryAction::Branch => "BRANCH",
            HistoryAction::Tag => "TAG",
            HistoryAction::Untag => "UNTAG",
            HistoryAction::Archive => "ARCHIVE",
            HistoryAction::Snapshot => "SNAPSHOT",
            HistoryAction::Restore => "RESTORE",
            HistoryAction::Purge => "PURGE",
            HistoryAction::Cleanup => "CLEANUP",
        }
    }

    /// Actions that are always worth a second look
    pub fn is_sensitive(&self) -> bool {
        matches!(
            self,
            HistoryAction::Delete
                | HistoryAction::Rollback
                | HistoryAction::Merge
                | HistoryAction::Import
        )
    }

    /// Summary template; `{source}`, `{version}` and `{records}` are substituted
    pub fn summary_template(&self) -> &'static str {
        match self {
            HistoryAction::Create => "Created version {version} of {source} with {records} records",
            HistoryAction::Update => "Updated version {version} of {source}",
            HistoryAction::Delete => "Deleted {version} of {source}",
            HistoryAction::Rollback => "Rolled back {source} to version {version}",
            HistoryAction::Merge => "Merged into {source} at version {version}",
            HistoryAction::Import => "Imported {records} records into {source}",
            HistoryAction::Export => "Exported {records} records from {source}",
            HistoryAction::Branch => "Created branch of {source} from version {version}",
            HistoryAction::Tag => "Tagged version {version} of {source}",
            HistoryAction::Untag => "Removed tag from version {version} of {source}",
            HistoryAction::Archive => "Archived {version} of {source}",
            HistoryAction::Snapshot => "Stored snapshot for version {version} of {source} ({records} records)",
            HistoryAction::Restore => "Restored version {version} of {source}",
            HistoryAction::Purge => "Purged version {version} of {source}",
            HistoryAction::Cleanup => "Cleaned up {records} items of {source}",
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HistoryAction {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        HistoryAction::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == upper)
            .ok_or_else(|| VaultError::validation(format!("Unknown history action: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }

    /// ERROR for failures, WARNING for sensitive actions, INFO otherwise
    pub fn for_outcome(action: HistoryAction, success: bool) -> Self {
        if !success {
            Severity::Error
        } else if action.is_sensitive() {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    #[default]
    User,
    System,
    Scheduler,
    Api,
}

impl FromStr for ActorType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(ActorType::User),
            "system" => Ok(ActorType::System),
            "scheduler" => Ok(ActorType::Scheduler),
            "api" => Ok(ActorType::Api),
            other => Err(VaultError::validation(format!("Unknown actor type: {}", other))),
        }
    }
}

/// Who performed an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    pub actor_type: ActorType,
}

impl Actor {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actor_type: ActorType::User,
        }
    }

    pub fn system() -> Self {
        Self {
            name: "system".to_string(),
            actor_type: ActorType::System,
        }
    }

    pub fn new(name: impl Into<String>, actor_type: ActorType) -> Self {
        Self {
            name: name.into(),
            actor_type,
        }
    }
}

/// One immutable audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub entry_id: Uuid,
    pub source_id: String,
    pub version_id: Option<String>,
    pub action: HistoryAction,
    pub severity: Severity,
    pub actor: String,
    pub actor_type: ActorType,
    #[serde(default)]
    pub details: Map<String, Value>,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub affected_records: u64,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Builder for an entry before severity and summary are assigned
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub source_id: String,
    pub action: HistoryAction,
    pub version_id: Option<String>,
    pub actor: Actor,
    pub details: Map<String, Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub affected_records: u64,
    pub summary: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewEntry {
    pub fn new(source_id: impl Into<String>, action: HistoryAction, actor: &Actor) -> Self {
        Self {
            source_id: source_id.into(),
            action,
            version_id: None,
            actor: actor.clone(),
            details: Map::new(),
            success: true,
            error_message: None,
            affected_records: 0,
            summary: None,
            timestamp: None,
        }
    }

    pub fn with_version(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_affected_records(mut self, count: u64) -> Self {
        self.affected_records = count;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Backdate an entry (imports from another system)
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(message.into());
        self
    }

    /// Mark success or failure from an operation outcome
    pub fn outcome<T>(self, result: &Result<T, VaultError>) -> Self {
        match result {
            Ok(_) => self,
            Err(e) => self.failed(e.to_string()),
        }
    }
}

impl HistoryEntry {
    /// Assign id, severity, timestamp and (if missing) summary
    pub fn from_new(new: NewEntry) -> Self {
        let severity = Severity::for_outcome(new.action, new.success);
        let summary = new.summary.unwrap_or_else(|| {
            render_summary(
                new.action,
                &new.source_id,
                new.version_id.as_deref(),
                new.affected_records,
                new.success,
            )
        });
        Self {
            entry_id: Uuid::new_v4(),
            source_id: new.source_id,
            version_id: new.version_id,
            action: new.action,
            severity,
            actor: new.actor.name,
            actor_type: new.actor.actor_type,
            details: new.details,
            summary,
            timestamp: new.timestamp.unwrap_or_else(Utc::now),
            affected_records: new.affected_records,
            success: new.success,
            error_message: new.error_message,
        }
    }

    /// Case-insensitive match over summary, actor, error message and details
    pub fn mentions(&self, keyword: &str) -> bool {
        let needle = keyword.to_lowercase();
        self.summary.to_lowercase().contains(&needle)
            || self.actor.to_lowercase().contains(&needle)
            || self
                .error_message
                .as_deref()
                .map_or(false, |m| m.to_lowercase().contains(&needle))
            || Value::Object(self.details.clone())
                .to_string()
                .to_lowercase()
                .contains(&needle)
    }
}

fn render_summary(
    action: HistoryAction,
    source_id: &str,
    version_id: Option<&str>,
    records: u64,
    success: bool,
) -> String {
    let text = action
        .summary_template()
        .replace("{source}", source_id)
        .replace("{version}", version_id.unwrap_or("-"))
        .replace("{records}", &records.to_string());
    if success {
        text
    } else {
        format!("FAILED: {}", text)
    }
}
