//! History queries and aggregates

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use super::entry::{HistoryAction, HistoryEntry, Severity};
use crate::error::VaultError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub source_id: Option<String>,
    pub version_id: Option<String>,
    pub actor: Option<String>,
    pub action: Option<HistoryAction>,
    pub severity: Option<Severity>,
    pub success: Option<bool>,
    /// Inclusive lower bound
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub until: Option<DateTime<Utc>>,
    pub keyword: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl HistoryFilter {
    pub fn for_source(source_id: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            ..Default::default()
        }
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn with_action(mut self, action: HistoryAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn failures_only(mut self) -> Self {
        self.success = Some(false);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        self.source_id.as_ref().map_or(true, |s| &entry.source_id == s)
            && self
                .version_id
                .as_ref()
                .map_or(true, |v| entry.version_id.as_ref() == Some(v))
            && self.actor.as_ref().map_or(true, |a| &entry.actor == a)
            && self.action.map_or(true, |a| entry.action == a)
            && self.severity.map_or(true, |s| entry.severity == s)
            && self.success.map_or(true, |s| entry.success == s)
            && self.since.map_or(true, |t| entry.timestamp >= t)
            && self.until.map_or(true, |t| entry.timestamp < t)
            && self.keyword.as_ref().map_or(true, |k| entry.mentions(k))
    }

    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total: usize,
    pub by_action: BTreeMap<HistoryAction, usize>,
    pub by_actor: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub success_count: usize,
    pub failure_count: usize,
    pub affected_records_total: u64,
    pub first_entry: Option<DateTime<Utc>>,
    pub last_entry: Option<DateTime<Utc>>,
}

impl HistoryStats {
    pub fn from_entries(entries: &[HistoryEntry]) -> Self {
        let mut stats = HistoryStats::default();
        for entry in entries {
            stats.total += 1;
            *stats.by_action.entry(entry.action).or_insert(0) += 1;
            *stats.by_actor.entry(entry.actor.clone()).or_insert(0) += 1;
            *stats.by_severity.entry(entry.severity).or_insert(0) += 1;
            if entry.success {
                stats.success_count += 1;
            } else {
                stats.failure_count += 1;
            }
            stats.affected_records_total += entry.affected_records;
            stats.first_entry = Some(match stats.first_entry {
                Some(t) if t <= entry.timestamp => t,
                _ => entry.timestamp,
            });
            stats.last_entry = Some(match stats.last_entry {
                Some(t) if t >= entry.timestamp => t,
                _ => entry.timestamp,
            });
        }
        stats
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.success_count as f64 / self.total as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Granularity {
    Hour,
    Day,
    Week,
}

impl Granularity {
    /// Start of the bucket containing `ts`; weeks start on Monday
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Hour => ts.duration_trunc(Duration::hours(1)).unwrap_or(ts),
            Granularity::Day => ts.duration_trunc(Duration::days(1)).unwrap_or(ts),
            Granularity::Week => {
                let day = ts.duration_trunc(Duration::days(1)).unwrap_or(ts);
                day - Duration::days(day.weekday().num_days_from_monday() as i64)
            }
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Granularity::Hour => "HOUR",
            Granularity::Day => "DAY",
            Granularity::Week => "WEEK",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Granularity {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            other => Err(VaultError::validation(format!("Unknown granularity: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineBucket {
    pub period_start: DateTime<Utc>,
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub by_action: BTreeMap<HistoryAction, usize>,
}

/// Bucket entries by period; only periods with activity are returned, oldest first
pub fn build_timeline(entries: &[HistoryEntry], granularity: Granularity) -> Vec<TimelineBucket> {
    let mut buckets: BTreeMap<DateTime<Utc>, TimelineBucket> = BTreeMap::new();
    for entry in entries {
        let start = granularity.bucket_start(entry.timestamp);
        let bucket = buckets.entry(start).or_insert_with(|| TimelineBucket {
            period_start: start,
            total: 0,
            success_count: 0,
            failure_count: 0,
            by_action: BTreeMap::new(),
        });
        bucket.total += 1;
        if entry.success {
            bucket.success_count += 1;
        } else {
            bucket.failure_count += 1;
        }
        *bucket.by_action.entry(entry.action).or_insert(0) += 1;
    }
    buckets.into_values().collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorActivity {
    pub actor: String,
    pub action_count: usize,
    pub failure_count: usize,
    pub last_active: DateTime<Utc>,
}

/// Most active actors first; ties break by name
pub fn rank_actors(entries: &[HistoryEntry], limit: usize) -> Vec<ActorActivity> {
    let mut by_actor: BTreeMap<&str, ActorActivity> = BTreeMap::new();
    for entry in entries {
        let activity = by_actor
            .entry(entry.actor.as_str())
            .or_insert_with(|| ActorActivity {
                actor: entry.actor.clone(),
                action_count: 0,
                failure_count: 0,
                last_active: entry.timestamp,
            });
        activity.action_count += 1;
        if !entry.success {
            activity.failure_count += 1;
        }
        if entry.timestamp > activity.last_active {
            activity.last_active = entry.timestamp;
        }
    }
    let mut ranked: Vec<ActorActivity> = by_actor.into_values().collect();
    ranked.sort_by(|a, b| {
        b.action_count
            .cmp(&a.action_count)
            .then_with(|| a.actor.cmp(&b.actor))
    });
    ranked.truncate(limit);
    ranked
}
