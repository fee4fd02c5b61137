//! Advisory locks keyed by `(source_id, branch)`
//!
//! Mutations of one branch are serialized; different branches never
//! contend. A lock is held by a [`BranchGuard`] and released on drop, so
//! every exit path (including `?`) releases it.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{VaultError, VaultResult};

type BranchKey = (String, String);

#[derive(Debug)]
pub struct BranchLocks {
    held: Mutex<HashSet<BranchKey>>,
    released: Condvar,
    timeout: Duration,
}

impl Default for BranchLocks {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl BranchLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Block until the branch is free or the timeout passes (`Conflict`)
    pub fn acquire(&self, source_id: &str, branch: &str) -> VaultResult<BranchGuard<'_>> {
        let key = (source_id.to_string(), branch.to_string());
        let deadline = Instant::now() + self.timeout;
        let mut held = self.held.lock().map_err(|_| VaultError::poisoned())?;

        while held.contains(&key) {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    event = "BRANCH_LOCK_TIMEOUT",
                    source_id,
                    branch,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Timed out waiting for branch lock"
                );
                return Err(VaultError::conflict(format!(
                    "Timed out waiting for lock on {}/{}",
                    source_id, branch
                )));
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| VaultError::poisoned())?;
            held = guard;
        }

        held.insert(key.clone());
        Ok(BranchGuard { locks: self, key })
    }

    /// Non-blocking attempt
    pub fn try_acquire(&self, source_id: &str, branch: &str) -> VaultResult<Option<BranchGuard<'_>>> {
        let key = (source_id.to_string(), branch.to_string());
        let mut held = self.held.lock().map_err(|_| VaultError::poisoned())?;
        if !held.insert(key.clone()) {
            return Ok(None);
        }
        Ok(Some(BranchGuard { locks: self, key }))
    }

    pub fn is_locked(&self, source_id: &str, branch: &str) -> bool {
        let key = (source_id.to_string(), branch.to_string());
        self.held_set().contains(&key)
    }

    fn held_set(&self) -> MutexGuard<'_, HashSet<BranchKey>> {
        // A panic while holding this mutex cannot leave the set half-updated
        match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[must_use]
#[derive(Debug)]
pub struct BranchGuard<'a> {
    locks: &'a BranchLocks,
    key: BranchKey,
}

impl Drop for BranchGuard<'_> {
    fn drop(&mut self) {
        self.locks.held_set().remove(&self.key);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_guard_releases_on_drop() {
        let locks = BranchLocks::default();
        {
            let _guard = locks.acquire("news", "main").unwrap();
            assert!(locks.is_locked("news", "main"));
            assert!(locks.try_acquire("news", "main").unwrap().is_none());
        }
        assert!(!locks.is_locked("news", "main"));
    }

    #[test]
    fn test_branches_are_independent() {
        let locks = BranchLocks::default();
        let _main = locks.acquire("news", "main").unwrap();
        assert!(locks.try_acquire("news", "dev").unwrap().is_some());
        assert!(locks.try_acquire("other", "main").unwrap().is_some());
    }

    #[test]
    fn test_timeout_is_conflict() {
        let locks = BranchLocks::new(Duration::from_millis(20));
        let _guard = locks.acquire("news", "main").unwrap();
        let err = locks.acquire("news", "main").unwrap_err();
        assert_eq!(err.code(), "VAULT_CONFLICT");
    }

    #[test]
    fn test_waiter_proceeds_after_release() {
        let locks = Arc::new(BranchLocks::new(Duration::from_secs(5)));
        let guard = locks.acquire("news", "main").unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.acquire("news", "main").map(|_| ()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(waiter.join().unwrap().is_ok());
    }
}
