//! Persistence boundary for stock accounts, their ledger and reservations.
//!
//! The store is shared by every caller, but only the reservation manager
//! writes to it. Writes go through [`StockStore::commit`], which applies a
//! whole [`WriteBatch`] atomically; reads return consistent snapshots and
//! never wait on the manager's per-account locks.

pub mod in_memory;

use std::sync::Arc;

use thiserror::Error;

use stockkeep_core::{ExpectedVersion, ReservationId};
use stockkeep_inventory::{AccountId, LedgerEntry, NewLedgerEntry, Reservation, StockAccount};

pub use in_memory::InMemoryStockStore;

/// Storage-level failure.
///
/// These are infrastructure errors, as opposed to the stock-rule rejections
/// reported by the domain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// An account write's expected version did not match what is stored.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// The batch is malformed (duplicate writes, entries for unknown accounts, ...).
    #[error("invalid write batch: {0}")]
    InvalidBatch(String),

    /// Internal lock poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,

    /// Backend unreachable or failing.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Account state to persist, guarded by the version it was loaded at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountWrite {
    pub account: StockAccount,
    pub expected_version: ExpectedVersion,
}

/// Everything one manager operation persists, applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    pub accounts: Vec<AccountWrite>,
    pub entries: Vec<NewLedgerEntry>,
    pub reservations: Vec<Reservation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_account(&mut self, account: StockAccount, expected_version: ExpectedVersion) {
        self.accounts.push(AccountWrite {
            account,
            expected_version,
        });
    }

    pub fn push_entry(&mut self, entry: NewLedgerEntry) {
        self.entries.push(entry);
    }

    pub fn push_reservation(&mut self, reservation: Reservation) {
        self.reservations.push(reservation);
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.entries.is_empty() && self.reservations.is_empty()
    }
}

/// An account together with its full ledger, read in one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub account: StockAccount,
    pub ledger: Vec<LedgerEntry>,
}

/// Durable storage for the reservation core.
///
/// Implementations must:
/// - apply a batch atomically (every write or none)
/// - check each account write's `expected_version` against the stored version
/// - assign ledger sequence numbers per account, starting at 1, without gaps
/// - never modify or delete a ledger entry once written
/// - keep ledger entries readable after an account is archived
pub trait StockStore: Send + Sync {
    /// Atomically persist a batch. Returns the ledger entries as written.
    fn commit(&self, batch: WriteBatch) -> Result<Vec<LedgerEntry>, StoreError>;

    fn load_account(&self, id: AccountId) -> Result<Option<StockAccount>, StoreError>;

    /// All accounts, archived ones included, ordered by id.
    fn list_accounts(&self) -> Result<Vec<StockAccount>, StoreError>;

    /// Ledger of one account in sequence order (empty if unknown).
    fn load_ledger(&self, id: AccountId) -> Result<Vec<LedgerEntry>, StoreError>;

    fn load_snapshot(&self, id: AccountId) -> Result<Option<AccountSnapshot>, StoreError>;

    fn load_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    /// Reservations carrying `reference`.
    fn list_reservations(&self, reference: &str) -> Result<Vec<Reservation>, StoreError>;
}

impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    fn commit(&self, batch: WriteBatch) -> Result<Vec<LedgerEntry>, StoreError> {
        (**self).commit(batch)
    }

    fn load_account(&self, id: AccountId) -> Result<Option<StockAccount>, StoreError> {
        (**self).load_account(id)
    }

    fn list_accounts(&self) -> Result<Vec<StockAccount>, StoreError> {
        (**self).list_accounts()
    }

    fn load_ledger(&self, id: AccountId) -> Result<Vec<LedgerEntry>, StoreError> {
        (**self).load_ledger(id)
    }

    fn load_snapshot(&self, id: AccountId) -> Result<Option<AccountSnapshot>, StoreError> {
        (**self).load_snapshot(id)
    }

    fn load_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        (**self).load_reservation(id)
    }

    fn list_reservations(&self, reference: &str) -> Result<Vec<Reservation>, StoreError> {
        (**self).list_reservations(reference)
    }
}
