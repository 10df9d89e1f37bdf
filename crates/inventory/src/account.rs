use serde::{Deserialize, Serialize};

use stockkeep_core::{AggregateId, AggregateRoot, DomainError, DomainResult};

use crate::error::StockError;
use crate::ledger::Balance;

/// Stock account identifier (one per product / variant).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub AggregateId);

impl AccountId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// Fresh time-ordered identifier.
    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for AccountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: the on-hand / reserved quantity pair of one stock item.
///
/// Invariant: `0 <= reserved <= on_hand` after every operation. All
/// mutating operations validate first and leave the account untouched when
/// they fail. Each successful mutation bumps `version` by one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAccount {
    id: AccountId,
    name: String,
    on_hand: i64,
    reserved: i64,
    alert_threshold: i64,
    archived: bool,
    version: u64,
}

impl StockAccount {
    /// Open a new account with an initial on-hand quantity and nothing reserved.
    pub fn open(
        id: AccountId,
        name: impl Into<String>,
        on_hand: i64,
        alert_threshold: i64,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("account name cannot be empty"));
        }
        if on_hand < 0 {
            return Err(DomainError::validation("opening quantity cannot be negative"));
        }
        if alert_threshold < 0 {
            return Err(DomainError::validation("alert threshold cannot be negative"));
        }

        Ok(Self {
            id,
            name,
            on_hand,
            reserved: 0,
            alert_threshold,
            archived: false,
            version: 0,
        })
    }

    pub fn id_typed(&self) -> AccountId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on_hand(&self) -> i64 {
        self.on_hand
    }

    pub fn reserved(&self) -> i64 {
        self.reserved
    }

    pub fn alert_threshold(&self) -> i64 {
        self.alert_threshold
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    /// Quantity that can still be newly reserved.
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }

    pub fn balance(&self) -> Balance {
        Balance {
            on_hand: self.on_hand,
            reserved: self.reserved,
        }
    }

    pub fn is_low_stock(&self) -> bool {
        self.available() <= self.alert_threshold
    }

    pub fn can_reserve(&self, qty: i64) -> bool {
        qty > 0 && self.available() >= qty
    }

    pub fn apply_reserve(&mut self, qty: i64) -> Result<(), StockError> {
        ensure_positive(qty)?;
        if !self.can_reserve(qty) {
            return Err(StockError::InsufficientStock {
                requested: qty,
                available: self.available(),
            });
        }

        self.reserved += qty;
        self.version += 1;
        Ok(())
    }

    /// Give reserved quantity back to the available pool. `on_hand` is unchanged.
    pub fn apply_release(&mut self, qty: i64) -> Result<(), StockError> {
        ensure_positive(qty)?;
        if qty > self.reserved {
            return Err(StockError::InvalidReleaseAmount {
                requested: qty,
                reserved: self.reserved,
            });
        }

        self.reserved -= qty;
        self.version += 1;
        Ok(())
    }

    /// Turn reserved quantity into a permanent deduction.
    ///
    /// Only reserved units can be committed, so a commit can never push
    /// `on_hand` below what other reservations still hold.
    pub fn apply_commit(&mut self, qty: i64) -> Result<(), StockError> {
        ensure_positive(qty)?;
        if qty > self.reserved {
            return Err(StockError::InvalidCommitAmount {
                requested: qty,
                reserved: self.reserved,
            });
        }

        self.reserved -= qty;
        self.on_hand -= qty;
        self.version += 1;
        Ok(())
    }

    /// Direct correction of `on_hand` (receiving, stock-take, shrinkage).
    pub fn apply_adjust(&mut self, delta: i64) -> Result<(), StockError> {
        if delta == 0 {
            return Err(StockError::InvalidQuantity(delta));
        }

        let new_on_hand = match self.on_hand.checked_add(delta) {
            Some(v) if v >= self.reserved => v,
            _ => {
                return Err(StockError::InvalidAdjustment {
                    delta,
                    on_hand: self.on_hand,
                    reserved: self.reserved,
                });
            }
        };

        self.on_hand = new_on_hand;
        self.version += 1;
        Ok(())
    }

    pub fn set_alert_threshold(&mut self, threshold: i64) -> DomainResult<()> {
        if threshold < 0 {
            return Err(DomainError::validation("alert threshold cannot be negative"));
        }
        self.alert_threshold = threshold;
        self.version += 1;
        Ok(())
    }

    /// Soft-close the account. Its ledger stays readable.
    pub fn archive(&mut self) -> DomainResult<()> {
        if self.archived {
            return Err(DomainError::conflict("account already archived"));
        }
        if self.reserved > 0 {
            return Err(DomainError::validation(format!(
                "cannot archive while {} units are reserved",
                self.reserved
            )));
        }
        self.archived = true;
        self.version += 1;
        Ok(())
    }
}

impl AggregateRoot for StockAccount {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn ensure_positive(qty: i64) -> Result<(), StockError> {
    if qty <= 0 {
        return Err(StockError::InvalidQuantity(qty));
    }
    Ok(())
}
