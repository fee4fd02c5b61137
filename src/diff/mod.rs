//! Structural diffing of record collections
//!
//! The diff engine has no dependencies on the rest of the vault. It is
//! used for change summaries on version creation, for building the
//! delta payloads of incremental and differential snapshots, and for
//! version comparison.
//!
//! Records are matched by a key field. Records that lack the key are
//! matched by a hash of their full canonical content, so a changed
//! key-less record shows up as one deletion plus one addition.

mod anomaly;
mod engine;
mod patch;

pub use anomaly::{detect_anomalies, Anomaly, AnomalyKind, AnomalyThresholds};
pub use engine::{
    values_equal, ChangeType, DiffEngine, DiffOptions, DiffResult, DiffSummary, FieldChange,
    RecordChange,
};
pub use patch::{apply_delta, Delta, ModifiedRecord, Patch, PatchSummary};
