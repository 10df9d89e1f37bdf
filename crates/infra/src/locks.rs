//! Per-account exclusive locks.
//!
//! Every mutation holds the locks of the accounts it touches for the span of
//! load, validate, apply and store commit. Multi-account operations lock in
//! ascending `AccountId` order, so two batches with overlapping accounts can
//! never wait on each other in a cycle. Acquisition is bounded by a timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use stockkeep_inventory::AccountId;

/// Lock acquisition gave up on `account_id` after the configured timeout.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LockTimeout {
    pub account_id: AccountId,
}

/// Registry of one mutex per account, created on first use.
#[derive(Debug, Default)]
pub struct LockTable {
    slots: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the locks for `ids`, deduplicated and in canonical order.
    pub fn lock_set(&self, ids: &[AccountId]) -> LockSet {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut slots = self.slots.lock();
        let entries = ids
            .into_iter()
            .map(|id| {
                let slot = slots.entry(id).or_insert_with(|| Arc::new(Mutex::new(())));
                (id, Arc::clone(slot))
            })
            .collect();

        LockSet { entries }
    }

    /// Forget the lock of an account nobody will mutate again.
    ///
    /// Anyone still holding the `Arc` keeps a valid (now private) mutex.
    pub fn evict(&self, id: AccountId) {
        self.slots.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The locks one operation needs, ready to be acquired together.
#[derive(Debug)]
pub struct LockSet {
    entries: Vec<(AccountId, Arc<Mutex<()>>)>,
}

impl LockSet {
    /// Account ids covered by this set, ascending.
    pub fn ids(&self) -> impl Iterator<Item = AccountId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    /// Acquire every lock in order, waiting at most `timeout` for each.
    ///
    /// On timeout the locks taken so far are released before returning.
    pub fn acquire(&self, timeout: Duration) -> Result<Vec<MutexGuard<'_, ()>>, LockTimeout> {
        let mut guards = Vec::with_capacity(self.entries.len());
        for (account_id, lock) in &self.entries {
            match lock.try_lock_for(timeout) {
                Some(guard) => guards.push(guard),
                None => {
                    return Err(LockTimeout {
                        account_id: *account_id,
                    });
                }
            }
        }
        Ok(guards)
    }
}
