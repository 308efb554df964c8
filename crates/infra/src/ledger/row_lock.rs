//! Per-record exclusive locks.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};

use super::{LedgerError, RecordKey};

/// Table of held row locks. Contention is per key; unrelated rows never wait
/// on each other.
#[derive(Debug, Default)]
pub struct RowLocks {
    held: Mutex<HashSet<RecordKey>>,
    released: Condvar,
}

impl RowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free, then take it.
    ///
    /// Not reentrant: taking a key twice on one thread deadlocks.
    pub fn acquire(&self, key: RecordKey) -> Result<RowGuard<'_>, LedgerError> {
        let mut held = self.held.lock().map_err(|_| LedgerError::Poisoned)?;
        while held.contains(&key) {
            held = self.released.wait(held).map_err(|_| LedgerError::Poisoned)?;
        }
        held.insert(key);
        Ok(RowGuard { locks: self, key })
    }

    pub fn is_locked(&self, key: RecordKey) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(&key))
            .unwrap_or(false)
    }
}

/// Releases its row when dropped.
#[derive(Debug)]
pub struct RowGuard<'a> {
    locks: &'a RowLocks,
    key: RecordKey,
}

impl RowGuard<'_> {
    pub fn key(&self) -> RecordKey {
        self.key
    }
}

impl Drop for RowGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.key);
        drop(held);
        self.locks.released.notify_all();
    }
}
