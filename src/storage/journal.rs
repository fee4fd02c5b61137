//! Append-only metadata journal
//!
//! Each mutation is one line: `<crc32 hex> <json op>\n`, fsynced before
//! the mutation is applied in memory. On open the journal is replayed in
//! order to rebuild the tables.
//!
//! Replay rules:
//! - A torn final line (no newline, or bad checksum on the last line) is
//!   a crash mid-append and is truncated away
//! - A bad line followed by more lines is corruption and fails the open
//!
//! Only one process may hold a journal: `open` takes an exclusive lock on
//! `.lock` next to it and keeps it until the journal is dropped. A write
//! that fails is cut back off the file and the journal refuses further
//! writes until it is reopened.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::tables::Tables;
use crate::error::{VaultError, VaultResult};
use crate::history::HistoryEntry;
use crate::snapshot::{Snapshot, SnapshotStatus};
use crate::version::{Supersede, Version, VersionStatus};

/// One logged mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalOp {
    CommitVersion {
        version: Version,
        supersede: Option<Supersede>,
    },
    SetVersionTags {
        version_id: String,
        tags: BTreeSet<String>,
    },
    SetVersionStatus {
        version_id: String,
        from: VersionStatus,
        to: VersionStatus,
    },
    InsertSnapshot {
        snapshot: Snapshot,
    },
    SetSnapshotStatus {
        snapshot_id: String,
        status: SnapshotStatus,
    },
    RemoveSnapshot {
        snapshot_id: String,
    },
    AppendHistory {
        entry: HistoryEntry,
    },
    DeleteHistory {
        entry_ids: Vec<Uuid>,
    },
}

/// Where validated ops go before they are applied
pub trait OpSink: Send + Sync {
    fn record(&mut self, op: &JournalOp) -> VaultResult<()>;
}

/// Sink for purely in-memory stores
#[derive(Debug, Default)]
pub struct NoJournal;

impl OpSink for NoJournal {
    fn record(&mut self, _op: &JournalOp) -> VaultResult<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
    /// Bytes of acknowledged ops
    len: u64,
    entries: u64,
    failed: bool,
    _lock_file: File,
}

fn acquire_lock(path: &Path) -> VaultResult<File> {
    let lock_path = path.with_file_name(".lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&lock_path)?;
    lock_file.try_lock_exclusive().map_err(|_| {
        VaultError::conflict(format!(
            "{} is held by another process",
            lock_path.display()
        ))
    })?;
    Ok(lock_file)
}

fn frame(op: &JournalOp) -> VaultResult<Vec<u8>> {
    let json = serde_json::to_string(op)?;
    let crc = crc32fast::hash(json.as_bytes());
    Ok(format!("{:08x} {}\n", crc, json).into_bytes())
}

fn unframe(line: &str) -> Option<JournalOp> {
    let (crc_hex, json) = line.split_once(' ')?;
    let expected = u32::from_str_radix(crc_hex, 16).ok()?;
    if crc32fast::hash(json.as_bytes()) != expected {
        return None;
    }
    serde_json::from_str(json).ok()
}

impl Journal {
    /// Open the journal at `path`, replaying it into fresh tables
    pub fn open(path: &Path) -> VaultResult<(Journal, Tables)> {
        let lock_file = acquire_lock(path)?;

        let mut contents = String::new();
        if path.exists() {
            File::open(path)?
                .read_to_string(&mut contents)
                .map_err(|e| VaultError::integrity(format!("Journal is not UTF-8: {}", e)))?;
        }

        let mut tables = Tables::default();
        let mut valid_len = 0usize;
        let mut entries = 0u64;
        let mut offset = 0usize;

        while offset < contents.len() {
            let rest = &contents[offset..];
            let (line, complete) = match rest.find('\n') {
                Some(end) => (&rest[..end], true),
                None => (rest, false),
            };
            let next = offset + line.len() + usize::from(complete);
            let is_last = next >= contents.len();

            match unframe(line) {
                Some(op) if complete => {
                    tables.validate(&op).map_err(|e| {
                        VaultError::integrity(format!(
                            "Journal entry {} does not replay: {}",
                            entries + 1,
                            e
                        ))
                    })?;
                    tables.apply(op);
                    entries += 1;
                    valid_len = next;
                }
                _ if is_last => {
                    warn!(
                        event = "JOURNAL_TORN_TAIL",
                        path = %path.display(),
                        discarded_bytes = contents.len() - offset,
                        "Discarding incomplete journal tail"
                    );
                    break;
                }
                _ => {
                    return Err(VaultError::integrity(format!(
                        "Journal corrupted at byte {} of {}",
                        offset,
                        path.display()
                    )));
                }
            }
            offset = next;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        if (valid_len as u64) < file.metadata()?.len() {
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }
        let file = OpenOptions::new().append(true).open(path)?;

        info!(
            event = "JOURNAL_REPLAYED",
            path = %path.display(),
            entries,
            "Journal replayed"
        );

        Ok((
            Journal {
                path: path.to_path_buf(),
                file,
                len: valid_len as u64,
                entries,
                failed: false,
                _lock_file: lock_file,
            },
            tables,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ops written, including replayed ones
    pub fn entries(&self) -> u64 {
        self.entries
    }
}

impl OpSink for Journal {
    fn record(&mut self, op: &JournalOp) -> VaultResult<()> {
        if self.failed {
            return Err(VaultError::storage(format!(
                "Journal {} stopped after a failed write; reopen the store",
                self.path.display()
            )));
        }

        let bytes = frame(op)?;
        let written = self
            .file
            .write_all(&bytes)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            // Whatever reached the file must not be replayed or glued to the next op
            let truncated = self
                .file
                .set_len(self.len)
                .and_then(|()| self.file.sync_data());
            self.failed = true;
            error!(
                event = "JOURNAL_WRITE_FAILED",
                path = %self.path.display(),
                error = %e,
                truncated = truncated.is_ok(),
                "Journal write failed"
            );
            return Err(VaultError::storage(format!(
                "Journal write to {} failed: {}",
                self.path.display(),
                e
            )));
        }

        self.len += bytes.len() as u64;
        self.entries += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Actor, HistoryAction, NewEntry};
    use std::fs;
    use tempfile::TempDir;

    fn history_op(source: &str) -> JournalOp {
        JournalOp::AppendHistory {
            entry: HistoryEntry::from_new(NewEntry::new(
                source,
                HistoryAction::Create,
                &Actor::system(),
            )),
        }
    }

    #[test]
    fn test_frame_roundtrip_detects_tamper() {
        let op = history_op("news");
        let bytes = frame(&op).unwrap();
        let line = std::str::from_utf8(&bytes).unwrap().trim_end();
        assert_eq!(unframe(line), Some(op));
        let tampered = line.replace("news", "newz");
        assert_eq!(unframe(&tampered), None);
    }

    #[test]
    fn test_replay_rebuilds_tables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.log");
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.record(&history_op("a")).unwrap();
            journal.record(&history_op("b")).unwrap();
        }
        let (journal, tables) = Journal::open(&path).unwrap();
        assert_eq!(journal.entries(), 2);
        assert_eq!(tables.history_len(), 2);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.log");
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.record(&history_op("a")).unwrap();
        }
        let good_len = fs::metadata(&path).unwrap().len();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"deadbeef {\"op\":\"append_hi").unwrap();
        drop(file);

        let (journal, tables) = Journal::open(&path).unwrap();
        assert_eq!(journal.entries(), 1);
        assert_eq!(tables.history_len(), 1);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn test_mid_file_corruption_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.log");
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.record(&history_op("a")).unwrap();
            journal.record(&history_op("b")).unwrap();
        }
        let contents = fs::read_to_string(&path).unwrap();
        fs::write(&path, contents.replacen("\"a\"", "\"x\"", 1)).unwrap();

        let err = Journal::open(&path).unwrap_err();
        assert_eq!(err.code(), "VAULT_INTEGRITY");
    }

    #[test]
    fn test_second_open_is_refused_while_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.log");
        let (held, _) = Journal::open(&path).unwrap();

        let err = Journal::open(&path).unwrap_err();
        assert!(matches!(err, VaultError::Conflict(_)));

        drop(held);
        assert!(Journal::open(&path).is_ok());
    }

    #[test]
    fn test_failed_write_stops_the_journal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.log");
        let (mut journal, _) = Journal::open(&path).unwrap();
        journal.record(&history_op("a")).unwrap();
        let good_len = fs::metadata(&path).unwrap().len();

        // A read-only handle makes the next append fail
        let writable = std::mem::replace(&mut journal.file, File::open(&path).unwrap());
        let err = journal.record(&history_op("b")).unwrap_err();
        assert_eq!(err.code(), "VAULT_STORAGE");

        // Even with a working handle back, nothing more is accepted
        journal.file = writable;
        assert!(journal.record(&history_op("c")).is_err());
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
        drop(journal);

        let (journal, tables) = Journal::open(&path).unwrap();
        assert_eq!(journal.entries(), 1);
        assert_eq!(tables.history_len(), 1);
    }
}
