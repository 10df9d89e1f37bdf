//! Read-only view over the stock store.
//!
//! Queries never take the manager's account locks. Each call reads one
//! consistent snapshot from the store, so a value may be stale by the time the
//! caller looks at it but is never torn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockkeep_inventory::{AccountId, Balance, LedgerEntry, ReplayError, StockAccount, replay, replay_until};

use crate::store::{StockStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("stock account {0} not found")]
    AccountNotFound(AccountId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("ledger replay failed: {0}")]
    Replay(#[from] ReplayError),
}

/// One row of the low-stock report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockItem {
    pub account_id: AccountId,
    pub name: String,
    pub on_hand: i64,
    pub reserved: i64,
    pub available: i64,
    pub alert_threshold: i64,
}

impl From<&StockAccount> for LowStockItem {
    fn from(account: &StockAccount) -> Self {
        Self {
            account_id: account.id_typed(),
            name: account.name().to_string(),
            on_hand: account.on_hand(),
            reserved: account.reserved(),
            available: account.available(),
            alert_threshold: account.alert_threshold(),
        }
    }
}

/// Stored account quantities next to what its ledger replays to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub account_id: AccountId,
    pub stored: Balance,
    pub replayed: Balance,
    pub entries: usize,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.stored == self.replayed
    }
}

#[derive(Debug, Clone)]
pub struct StockQuery<S> {
    store: S,
}

impl<S> StockQuery<S>
where
    S: StockStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn available_quantity(&self, account_id: AccountId) -> Result<i64, QueryError> {
        Ok(self.account(account_id)?.available())
    }

    /// Archived accounts are never low, matching `list_low_stock`.
    pub fn is_low_stock(&self, account_id: AccountId) -> Result<bool, QueryError> {
        let account = self.account(account_id)?;
        Ok(!account.is_archived() && account.is_low_stock())
    }

    /// Active accounts at or below their alert threshold, ordered by id.
    pub fn list_low_stock(&self) -> Result<Vec<LowStockItem>, QueryError> {
        let mut items: Vec<LowStockItem> = self
            .store
            .list_accounts()?
            .iter()
            .filter(|a| !a.is_archived() && a.is_low_stock())
            .map(LowStockItem::from)
            .collect();
        items.sort_by_key(|item| item.account_id);
        Ok(items)
    }

    /// Current account state, archived accounts included.
    pub fn account(&self, account_id: AccountId) -> Result<StockAccount, QueryError> {
        self.store
            .load_account(account_id)?
            .ok_or(QueryError::AccountNotFound(account_id))
    }

    pub fn ledger(&self, account_id: AccountId) -> Result<Vec<LedgerEntry>, QueryError> {
        // Distinguish "no such account" from "no entries yet".
        let snapshot = self
            .store
            .load_snapshot(account_id)?
            .ok_or(QueryError::AccountNotFound(account_id))?;
        Ok(snapshot.ledger)
    }

    /// Quantities as of `at`, rebuilt from the ledger.
    pub fn balance_as_of(&self, account_id: AccountId, at: DateTime<Utc>) -> Result<Balance, QueryError> {
        let ledger = self.ledger(account_id)?;
        Ok(replay_until(&ledger, at)?)
    }

    /// Audit an account: replay its whole ledger and compare with what is stored.
    pub fn reconcile(&self, account_id: AccountId) -> Result<Reconciliation, QueryError> {
        let snapshot = self
            .store
            .load_snapshot(account_id)?
            .ok_or(QueryError::AccountNotFound(account_id))?;

        Ok(Reconciliation {
            account_id,
            stored: snapshot.account.balance(),
            replayed: replay(&snapshot.ledger)?,
            entries: snapshot.ledger.len(),
        })
    }
}
