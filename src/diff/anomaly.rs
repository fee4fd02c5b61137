//! Heuristic change anomalies
//!
//! Signals for the caller, never errors. A crawl that suddenly rewrites
//! most of a dataset, drops a large share of it, or changes one field
//! across the board is usually a broken scraper rather than real data.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::engine::DiffResult;
use crate::error::{VaultError, VaultResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyThresholds {
    /// Changed records over collection size
    #[serde(default = "default_change_rate")]
    pub change_rate: f64,
    /// Deleted records over source size
    #[serde(default = "default_deletion_rate")]
    pub deletion_rate: f64,
    /// Share of all field-level changes held by a single field
    #[serde(default = "default_field_concentration")]
    pub field_concentration: f64,
}

fn default_change_rate() -> f64 {
    0.5
}
fn default_deletion_rate() -> f64 {
    0.3
}
fn default_field_concentration() -> f64 {
    0.8
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            change_rate: default_change_rate(),
            deletion_rate: default_deletion_rate(),
            field_concentration: default_field_concentration(),
        }
    }
}

impl AnomalyThresholds {
    pub fn validate(&self) -> VaultResult<()> {
        for (name, value) in [
            ("change_rate", self.change_rate),
            ("deletion_rate", self.deletion_rate),
            ("field_concentration", self.field_concentration),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(VaultError::validation(format!(
                    "anomaly threshold {} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    HighChangeRate,
    MassDeletion,
    FieldConcentration,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnomalyKind::HighChangeRate => "HIGH_CHANGE_RATE",
            AnomalyKind::MassDeletion => "MASS_DELETION",
            AnomalyKind::FieldConcentration => "FIELD_CONCENTRATION",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub message: String,
    pub observed: f64,
    pub threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

pub fn detect_anomalies(diff: &DiffResult, thresholds: &AnomalyThresholds) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    let change_rate = diff.change_rate();
    if change_rate > thresholds.change_rate {
        anomalies.push(Anomaly {
            kind: AnomalyKind::HighChangeRate,
            message: format!(
                "{:.1}% of records changed (threshold {:.1}%)",
                change_rate * 100.0,
                thresholds.change_rate * 100.0
            ),
            observed: change_rate,
            threshold: thresholds.change_rate,
            field: None,
        });
    }

    if diff.source_count > 0 {
        let deletion_rate = diff.deleted.len() as f64 / diff.source_count as f64;
        if deletion_rate > thresholds.deletion_rate {
            anomalies.push(Anomaly {
                kind: AnomalyKind::MassDeletion,
                message: format!(
                    "{} of {} records deleted",
                    diff.deleted.len(),
                    diff.source_count
                ),
                observed: deletion_rate,
                threshold: thresholds.deletion_rate,
                field: None,
            });
        }
    }

    let counts = diff.field_change_counts();
    let total: usize = counts.values().sum();
    if total > 0 {
        // BTreeMap iteration makes ties resolve to the first field name
        let (field, count) = counts
            .iter()
            .fold(None::<(&String, usize)>, |best, (name, &count)| match best {
                Some((_, c)) if c >= count => best,
                _ => Some((name, count)),
            })
            .map(|(name, count)| (name.clone(), count))
            .unwrap_or_default();
        let share = count as f64 / total as f64;
        if share > thresholds.field_concentration {
            anomalies.push(Anomaly {
                kind: AnomalyKind::FieldConcentration,
                message: format!(
                    "field '{}' accounts for {} of {} field changes",
                    field, count, total
                ),
                observed: share,
                threshold: thresholds.field_concentration,
                field: Some(field),
            });
        }
    }

    anomalies
}
