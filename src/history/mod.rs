//! Append-only audit trail
//!
//! Every mutating call in the version and snapshot managers records
//! exactly one entry per attempt, success or failure. Entries are never
//! edited; the only deletion path is [`HistoryTracker::cleanup_old_entries`],
//! which by default keeps failures regardless of age.

mod entry;
mod query;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

pub use entry::{Actor, ActorType, HistoryAction, HistoryEntry, NewEntry, Severity};
pub use query::{
    build_timeline, rank_actors, ActorActivity, Granularity, HistoryFilter, HistoryStats,
    TimelineBucket,
};

use crate::error::{VaultError, VaultResult};
use crate::storage::VaultStore;

/// Outcome of a history retention sweep
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct HistoryCleanup {
    pub dry_run: bool,
    pub cutoff: Option<DateTime<Utc>>,
    /// Entries deleted (or that would be deleted)
    pub deleted: usize,
    /// Old failure entries kept
    pub retained_failures: usize,
}

pub struct HistoryTracker {
    store: Arc<dyn VaultStore>,
}

impl HistoryTracker {
    pub fn new(store: Arc<dyn VaultStore>) -> Self {
        Self { store }
    }

    /// Persist one entry
    pub fn record(&self, new: NewEntry) -> VaultResult<HistoryEntry> {
        if new.source_id.trim().is_empty() {
            return Err(VaultError::validation("History entry needs a source_id"));
        }
        let entry = HistoryEntry::from_new(new);
        self.store.append_history(&entry)?;

        if entry.success {
            debug!(
                event = "HISTORY_RECORDED",
                entry_id = %entry.entry_id,
                source_id = %entry.source_id,
                action = %entry.action,
                severity = %entry.severity,
                "History entry recorded"
            );
        } else {
            warn!(
                event = "HISTORY_RECORDED",
                entry_id = %entry.entry_id,
                source_id = %entry.source_id,
                action = %entry.action,
                error = entry.error_message.as_deref().unwrap_or(""),
                "Failure recorded in history"
            );
        }
        Ok(entry)
    }

    /// Record the outcome of `result` and hand the result back unchanged
    ///
    /// A failure to write the entry never replaces the operation's own
    /// outcome; it is only logged.
    pub(crate) fn record_outcome<T>(&self, new: NewEntry, result: VaultResult<T>) -> VaultResult<T> {
        let new = new.outcome(&result);
        match (self.record(new), result) {
            (Ok(_), result) => result,
            (Err(history_err), Ok(value)) => {
                warn!(
                    event = "HISTORY_WRITE_FAILED",
                    error = %history_err,
                    "Operation succeeded but its history entry was not written"
                );
                Ok(value)
            }
            (Err(history_err), Err(op_err)) => {
                warn!(
                    event = "HISTORY_WRITE_FAILED",
                    error = %history_err,
                    "History entry for failed operation was not written"
                );
                Err(op_err)
            }
        }
    }

    /// Matching entries, newest first
    pub fn list_entries(&self, filter: &HistoryFilter) -> VaultResult<Vec<HistoryEntry>> {
        let unpaged = HistoryFilter {
            limit: None,
            offset: 0,
            ..filter.clone()
        };
        let mut entries = self.store.query_history(&unpaged)?;
        entries.reverse();
        Ok(filter.paginate(entries))
    }

    pub fn list_by_source(&self, source_id: &str, limit: Option<usize>) -> VaultResult<Vec<HistoryEntry>> {
        self.list_entries(&HistoryFilter {
            limit,
            ..HistoryFilter::for_source(source_id)
        })
    }

    pub fn list_by_version(&self, version_id: &str) -> VaultResult<Vec<HistoryEntry>> {
        self.list_entries(&HistoryFilter {
            version_id: Some(version_id.to_string()),
            ..Default::default()
        })
    }

    pub fn list_by_actor(&self, actor: &str, limit: Option<usize>) -> VaultResult<Vec<HistoryEntry>> {
        self.list_entries(&HistoryFilter {
            actor: Some(actor.to_string()),
            limit,
            ..Default::default()
        })
    }

    /// Entries in `[since, until)`, optionally for one source
    pub fn list_by_date_range(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        source_id: Option<&str>,
    ) -> VaultResult<Vec<HistoryEntry>> {
        if since > until {
            return Err(VaultError::validation("Date range start is after its end"));
        }
        self.list_entries(&HistoryFilter {
            source_id: source_id.map(str::to_string),
            ..Default::default()
        }
        .between(since, until))
    }

    pub fn list_failures(&self, source_id: Option<&str>, limit: Option<usize>) -> VaultResult<Vec<HistoryEntry>> {
        self.list_entries(&HistoryFilter {
            source_id: source_id.map(str::to_string),
            limit,
            ..Default::default()
        }
        .failures_only())
    }

    /// Case-insensitive keyword search over summaries, actors, errors and details
    pub fn search(&self, keyword: &str, source_id: Option<&str>, limit: Option<usize>) -> VaultResult<Vec<HistoryEntry>> {
        if keyword.trim().is_empty() {
            return Err(VaultError::validation("Search keyword is empty"));
        }
        self.list_entries(&HistoryFilter {
            source_id: source_id.map(str::to_string),
            keyword: Some(keyword.to_string()),
            limit,
            ..Default::default()
        })
    }

    pub fn get_stats(
        &self,
        source_id: Option<&str>,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> VaultResult<HistoryStats> {
        let mut filter = HistoryFilter {
            source_id: source_id.map(str::to_string),
            ..Default::default()
        };
        if let Some((since, until)) = range {
            filter = filter.between(since, until);
        }
        let entries = self.store.query_history(&filter)?;
        Ok(HistoryStats::from_entries(&entries))
    }

    /// Activity over the last `days`, bucketed by `granularity`
    pub fn get_activity_timeline(
        &self,
        source_id: Option<&str>,
        days: u32,
        granularity: Granularity,
    ) -> VaultResult<Vec<TimelineBucket>> {
        if days == 0 {
            return Err(VaultError::validation("Timeline needs at least one day"));
        }
        let filter = HistoryFilter {
            source_id: source_id.map(str::to_string),
            since: Some(Utc::now() - Duration::days(i64::from(days))),
            ..Default::default()
        };
        let entries = self.store.query_history(&filter)?;
        Ok(build_timeline(&entries, granularity))
    }

    pub fn get_top_actors(&self, source_id: Option<&str>, limit: usize) -> VaultResult<Vec<ActorActivity>> {
        let filter = HistoryFilter {
            source_id: source_id.map(str::to_string),
            ..Default::default()
        };
        let entries = self.store.query_history(&filter)?;
        Ok(rank_actors(&entries, limit))
    }

    /// Delete successful entries older than `retention_days`
    ///
    /// Failure entries are kept unless `include_failures` is set.
    /// Returns the number of entries deleted (or that would be, on a dry run).
    pub fn cleanup_old_entries(
        &self,
        retention_days: u32,
        dry_run: bool,
        include_failures: bool,
    ) -> VaultResult<usize> {
        self.cleanup_before(Utc::now(), retention_days, dry_run, include_failures)
            .map(|report| report.deleted)
    }

    /// Same as [`Self::cleanup_old_entries`] with an explicit clock
    pub fn cleanup_before(
        &self,
        now: DateTime<Utc>,
        retention_days: u32,
        dry_run: bool,
        include_failures: bool,
    ) -> VaultResult<HistoryCleanup> {
        if retention_days == 0 {
            return Err(VaultError::validation("retention_days must be > 0"));
        }
        let cutoff = now - Duration::days(i64::from(retention_days));
        let old = self.store.query_history(&HistoryFilter {
            until: Some(cutoff),
            ..Default::default()
        })?;

        let (doomed, kept): (Vec<&HistoryEntry>, Vec<&HistoryEntry>) =
            old.iter().partition(|e| e.success || include_failures);

        let deleted = if dry_run {
            doomed.len()
        } else {
            let ids: Vec<_> = doomed.iter().map(|e| e.entry_id).collect();
            self.store.delete_history(&ids)?
        };

        info!(
            event = "HISTORY_CLEANUP",
            dry_run,
            retention_days,
            deleted,
            retained_failures = kept.len(),
            "History cleanup finished"
        );

        Ok(HistoryCleanup {
            dry_run,
            cutoff: Some(cutoff),
            deleted,
            retained_failures: kept.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn tracker() -> HistoryTracker {
        HistoryTracker::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_record_assigns_severity() {
        let tracker = tracker();
        let entry = tracker
            .record(NewEntry::new("news", HistoryAction::Rollback, &Actor::user("ana")))
            .unwrap();
        assert_eq!(entry.severity, Severity::Warning);
        assert_eq!(tracker.list_by_source("news", None).unwrap().len(), 1);
    }

    #[test]
    fn test_record_rejects_empty_source() {
        let tracker = tracker();
        assert!(tracker
            .record(NewEntry::new(" ", HistoryAction::Create, &Actor::system()))
            .is_err());
    }

    #[test]
    fn test_record_outcome_keeps_operation_error() {
        let tracker = tracker();
        let result: VaultResult<()> = tracker.record_outcome(
            NewEntry::new("news", HistoryAction::Create, &Actor::system()),
            Err(VaultError::not_found("Version v9")),
        );
        assert!(matches!(result, Err(VaultError::NotFound(_))));

        let failures = tracker.list_failures(Some("news"), None).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].severity, Severity::Error);
        assert!(failures[0].summary.starts_with("FAILED: "));
    }

    #[test]
    fn test_list_newest_first_with_limit() {
        let tracker = tracker();
        let now = Utc::now();
        for hours in [3, 2, 1] {
            tracker
                .record(
                    NewEntry::new("news", HistoryAction::Tag, &Actor::system())
                        .with_detail("age", hours)
                        .at(now - Duration::hours(hours)),
                )
                .unwrap();
        }
        let latest = tracker.list_by_source("news", Some(2)).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].details["age"], 1);
        assert_eq!(latest[1].details["age"], 2);
    }

    #[test]
    fn test_search_and_actor_queries() {
        let tracker = tracker();
        tracker
            .record(NewEntry::new("news", HistoryAction::Tag, &Actor::user("ana")).with_detail("tag", "Release-1"))
            .unwrap();
        tracker
            .record(NewEntry::new("blog", HistoryAction::Create, &Actor::user("bo")))
            .unwrap();

        assert_eq!(tracker.search("release", None, None).unwrap().len(), 1);
        assert_eq!(tracker.list_by_actor("bo", None).unwrap().len(), 1);
        assert_eq!(tracker.get_top_actors(None, 5).unwrap().len(), 2);
        assert_eq!(tracker.get_stats(Some("news"), None).unwrap().total, 1);
    }

    #[test]
    fn test_cleanup_keeps_failures_and_recent_entries() {
        let tracker = tracker();
        let now = Utc::now();
        let old = now - Duration::days(91);
        let recent = now - Duration::days(89);
        let actor = Actor::system();

        tracker.record(NewEntry::new("news", HistoryAction::Create, &actor).at(old)).unwrap();
        tracker
            .record(NewEntry::new("news", HistoryAction::Create, &actor).at(old).failed("boom"))
            .unwrap();
        tracker.record(NewEntry::new("news", HistoryAction::Create, &actor).at(recent)).unwrap();
        tracker
            .record(NewEntry::new("news", HistoryAction::Create, &actor).at(recent).failed("boom"))
            .unwrap();

        let dry = tracker.cleanup_before(now, 90, true, false).unwrap();
        assert_eq!(dry.deleted, 1);
        assert_eq!(tracker.list_by_source("news", None).unwrap().len(), 4);

        let report = tracker.cleanup_before(now, 90, false, false).unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.retained_failures, 1);
        assert_eq!(tracker.list_by_source("news", None).unwrap().len(), 3);

        assert_eq!(tracker.cleanup_before(now, 90, false, true).unwrap().deleted, 1);
        assert_eq!(tracker.list_by_source("news", None).unwrap().len(), 2);
    }

    #[test]
    fn test_timeline_and_range_validation() {
        let tracker = tracker();
        tracker
            .record(NewEntry::new("news", HistoryAction::Create, &Actor::system()))
            .unwrap();
        let timeline = tracker
            .get_activity_timeline(Some("news"), 7, Granularity::Day)
            .unwrap();
        assert_eq!(timeline.iter().map(|b| b.total).sum::<usize>(), 1);

        let now = Utc::now();
        assert!(tracker.list_by_date_range(now, now - Duration::days(1), None).is_err());
        assert!(tracker.get_activity_timeline(None, 0, Granularity::Hour).is_err());
    }
}
