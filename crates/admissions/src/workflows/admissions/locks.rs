use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

use super::domain::{ApplicationId, IntentId, OwnerId};
use super::store::StoreError;

/// Rows that read-modify-write sequences serialize on.
///
/// Acquisition order is always `Owner`, then `Intent`, then `Application`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum LockKey {
    Owner(OwnerId),
    Intent(IntentId),
    Application(ApplicationId),
}

/// Exclusive per-key locks, the in-process stand-in for `SELECT ... FOR UPDATE`.
#[derive(Debug, Default)]
pub(crate) struct RowLocks {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
}

impl RowLocks {
    pub(crate) fn acquire(&self, key: LockKey) -> Result<RowGuard<'_>, StoreError> {
        let mut held = self.held.lock().map_err(|_| poisoned())?;
        while held.contains(&key) {
            held = self.released.wait(held).map_err(|_| poisoned())?;
        }
        held.insert(key.clone());
        Ok(RowGuard { locks: self, key })
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("row lock table poisoned".to_string())
}

pub(crate) struct RowGuard<'a> {
    locks: &'a RowLocks,
    key: LockKey,
}

impl Drop for RowGuard<'_> {
    fn drop(&mut self) {
        let mut held = match self.locks.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(&self.key);
        drop(held);
        self.locks.released.notify_all();
    }
}
