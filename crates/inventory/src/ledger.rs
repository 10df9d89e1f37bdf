//! Append-only quantity ledger.
//!
//! Every quantity change of a stock account is recorded as one entry per
//! reservation, release, commit or adjustment. Threshold and archive changes
//! are not quantity changes and write no entry.
//! Replaying an account's entries in sequence order from creation
//! reconstructs its `(on_hand, reserved)` pair at any point in time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockkeep_core::{EntryId, ReservationId};

use crate::account::AccountId;

/// Reference recorded on the entry written when an account opens with stock.
pub const OPENING_BALANCE: &str = "opening balance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    /// `delta = +qty`, moves available quantity into reserved.
    Reserve,
    /// `delta = -qty`, moves reserved quantity back to available.
    Release,
    /// `delta = -qty`, removes reserved quantity from on-hand for good.
    Commit,
    /// `delta` is the signed on-hand correction.
    Adjust,
}

/// Entry that has not been written yet (no sequence number).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub entry_id: EntryId,
    pub account_id: AccountId,
    pub kind: LedgerKind,
    pub delta: i64,
    pub reference: String,
    pub reservation_id: Option<ReservationId>,
    pub occurred_at: DateTime<Utc>,
}

impl NewLedgerEntry {
    fn build(
        account_id: AccountId,
        kind: LedgerKind,
        delta: i64,
        reference: impl Into<String>,
        reservation_id: Option<ReservationId>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: EntryId::new(),
            account_id,
            kind,
            delta,
            reference: reference.into(),
            reservation_id,
            occurred_at,
        }
    }

    pub fn reserve(
        account_id: AccountId,
        qty: i64,
        reference: impl Into<String>,
        reservation_id: ReservationId,
        at: DateTime<Utc>,
    ) -> Self {
        Self::build(account_id, LedgerKind::Reserve, qty, reference, Some(reservation_id), at)
    }

    pub fn release(
        account_id: AccountId,
        qty: i64,
        reference: impl Into<String>,
        reservation_id: ReservationId,
        at: DateTime<Utc>,
    ) -> Self {
        Self::build(account_id, LedgerKind::Release, -qty, reference, Some(reservation_id), at)
    }

    pub fn commit(
        account_id: AccountId,
        qty: i64,
        reference: impl Into<String>,
        reservation_id: ReservationId,
        at: DateTime<Utc>,
    ) -> Self {
        Self::build(account_id, LedgerKind::Commit, -qty, reference, Some(reservation_id), at)
    }

    pub fn adjust(
        account_id: AccountId,
        delta: i64,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self::build(account_id, LedgerKind::Adjust, delta, reason, None, at)
    }

    /// Freeze the entry at its position in the account stream.
    pub fn sequenced(self, sequence: u64) -> LedgerEntry {
        LedgerEntry {
            entry_id: self.entry_id,
            account_id: self.account_id,
            sequence,
            kind: self.kind,
            delta: self.delta,
            reference: self.reference,
            reservation_id: self.reservation_id,
            occurred_at: self.occurred_at,
        }
    }
}

/// Immutable audit record of one quantity change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    entry_id: EntryId,
    account_id: AccountId,
    /// 1-based, gap-free position in the account's stream.
    sequence: u64,
    kind: LedgerKind,
    delta: i64,
    reference: String,
    reservation_id: Option<ReservationId>,
    occurred_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn entry_id(&self) -> EntryId {
        self.entry_id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn kind(&self) -> LedgerKind {
        self.kind
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn reservation_id(&self) -> Option<ReservationId> {
        self.reservation_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// `(on_hand delta, reserved delta)` this entry contributes.
    pub fn effect(&self) -> (i64, i64) {
        match self.kind {
            LedgerKind::Reserve | LedgerKind::Release => (0, self.delta),
            LedgerKind::Commit => (self.delta, self.delta),
            LedgerKind::Adjust => (self.delta, 0),
        }
    }
}

/// Quantity state reconstructed from the ledger.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub on_hand: i64,
    pub reserved: i64,
}

impl Balance {
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }

    pub fn apply(&mut self, entry: &LedgerEntry) -> Result<(), ReplayError> {
        let (on_hand_delta, reserved_delta) = entry.effect();
        let (Some(on_hand), Some(reserved)) = (
            self.on_hand.checked_add(on_hand_delta),
            self.reserved.checked_add(reserved_delta),
        ) else {
            return Err(ReplayError::InvariantViolated {
                sequence: entry.sequence,
                on_hand: self.on_hand.saturating_add(on_hand_delta),
                reserved: self.reserved.saturating_add(reserved_delta),
            });
        };

        if reserved < 0 || reserved > on_hand {
            return Err(ReplayError::InvariantViolated {
                sequence: entry.sequence,
                on_hand,
                reserved,
            });
        }

        self.on_hand = on_hand;
        self.reserved = reserved;
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("ledger stream mixes accounts (expected {expected}, found {found})")]
    MixedAccounts { expected: AccountId, found: AccountId },

    #[error("ledger sequence not contiguous (last={last}, found={found})")]
    NonContiguousSequence { last: u64, found: u64 },

    #[error("replay broke quantity invariant at sequence {sequence} (on_hand={on_hand}, reserved={reserved})")]
    InvariantViolated { sequence: u64, on_hand: i64, reserved: i64 },
}

/// Replay an account's full stream, oldest first.
pub fn replay(entries: &[LedgerEntry]) -> Result<Balance, ReplayError> {
    replay_while(entries, |_| true)
}

/// Replay entries that occurred at or before `at`.
pub fn replay_until(entries: &[LedgerEntry], at: DateTime<Utc>) -> Result<Balance, ReplayError> {
    replay_while(entries, |e| e.occurred_at <= at)
}

fn replay_while(
    entries: &[LedgerEntry],
    keep: impl Fn(&LedgerEntry) -> bool,
) -> Result<Balance, ReplayError> {
    let mut balance = Balance::default();
    let mut last = 0u64;
    let account = entries.first().map(|e| e.account_id);

    for entry in entries {
        if let Some(expected) = account {
            if entry.account_id != expected {
                return Err(ReplayError::MixedAccounts {
                    expected,
                    found: entry.account_id,
                });
            }
        }
        if entry.sequence != last + 1 {
            return Err(ReplayError::NonContiguousSequence {
                last,
                found: entry.sequence,
            });
        }
        last = entry.sequence;

        if !keep(entry) {
            break;
        }
        balance.apply(entry)?;
    }

    Ok(balance)
}
