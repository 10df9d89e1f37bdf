use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use stockkeep_core::{AggregateRoot, ReservationId};
use stockkeep_inventory::{AccountId, LedgerEntry, Reservation, StockAccount};

use super::{AccountSnapshot, StockStore, StoreError, WriteBatch};

#[derive(Debug, Default)]
struct State {
    accounts: BTreeMap<AccountId, StockAccount>,
    ledgers: HashMap<AccountId, Vec<LedgerEntry>>,
    reservations: BTreeMap<ReservationId, Reservation>,
}

/// In-memory stock store.
///
/// A single `RwLock` over the whole state gives atomic batches and snapshot
/// reads. Suitable for tests, embedding and single-process use.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    state: RwLock<State>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate(state: &State, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut written = HashSet::with_capacity(batch.accounts.len());
        for (idx, w) in batch.accounts.iter().enumerate() {
            let id = w.account.id_typed();
            if !written.insert(id) {
                return Err(StoreError::InvalidBatch(format!(
                    "account {id} written twice (index {idx})"
                )));
            }

            let current = state.accounts.get(&id).map(|a| a.version());
            if !w.expected_version.matches(current) {
                return Err(StoreError::Concurrency(format!(
                    "account {id}: expected {:?}, found {current:?}",
                    w.expected_version
                )));
            }
        }

        let known = |id: &AccountId| written.contains(id) || state.accounts.contains_key(id);

        for (idx, e) in batch.entries.iter().enumerate() {
            if !known(&e.account_id) {
                return Err(StoreError::InvalidBatch(format!(
                    "ledger entry for unknown account {} (index {idx})",
                    e.account_id
                )));
            }
        }

        for r in &batch.reservations {
            if !known(&r.account_id()) {
                return Err(StoreError::InvalidBatch(format!(
                    "reservation {} for unknown account {}",
                    r.id(),
                    r.account_id()
                )));
            }
            if let Some(existing) = state.reservations.get(&r.id()) {
                if existing.account_id() != r.account_id() {
                    return Err(StoreError::InvalidBatch(format!(
                        "reservation {} cannot move between accounts",
                        r.id()
                    )));
                }
            }
        }

        Ok(())
    }
}

impl StockStore for InMemoryStockStore {
    fn commit(&self, batch: WriteBatch) -> Result<Vec<LedgerEntry>, StoreError> {
        if batch.is_empty() {
            return Ok(vec![]);
        }

        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;

        // Nothing below this point can fail, so the batch lands whole or not at all.
        Self::validate(&state, &batch)?;

        for w in batch.accounts {
            state.accounts.insert(w.account.id_typed(), w.account);
        }

        let mut committed = Vec::with_capacity(batch.entries.len());
        for entry in batch.entries {
            let stream = state.ledgers.entry(entry.account_id).or_default();
            let stored = entry.sequenced(stream.len() as u64 + 1);
            stream.push(stored.clone());
            committed.push(stored);
        }

        for r in batch.reservations {
            state.reservations.insert(r.id(), r);
        }

        Ok(committed)
    }

    fn load_account(&self, id: AccountId) -> Result<Option<StockAccount>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.accounts.get(&id).cloned())
    }

    fn list_accounts(&self) -> Result<Vec<StockAccount>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.accounts.values().cloned().collect())
    }

    fn load_ledger(&self, id: AccountId) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.ledgers.get(&id).cloned().unwrap_or_default())
    }

    fn load_snapshot(&self, id: AccountId) -> Result<Option<AccountSnapshot>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.accounts.get(&id).map(|account| AccountSnapshot {
            account: account.clone(),
            ledger: state.ledgers.get(&id).cloned().unwrap_or_default(),
        }))
    }

    fn load_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.reservations.get(&id).cloned())
    }

    fn list_reservations(&self, reference: &str) -> Result<Vec<Reservation>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .reservations
            .values()
            .filter(|r| r.reference() == reference)
            .cloned()
            .collect())
    }
}
