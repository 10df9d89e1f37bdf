use thiserror::Error;

use stockkeep_core::{DomainError, ReservationId};
use stockkeep_inventory::{AccountId, AlreadyResolved, ReservationState, StockError};

use crate::locks::LockTimeout;
use crate::store::StoreError;

/// Everything a reservation manager operation can report to its caller.
///
/// `InsufficientStock`, `Busy` and `Conflict` are expected under load; the
/// caller decides whether to retry, shrink the request or give up.
/// `HandleAlreadyResolved` means the caller used a handle twice.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReservationError {
    #[error("stock account {0} not found")]
    AccountNotFound(AccountId),

    #[error("stock account {0} is archived")]
    AccountArchived(AccountId),

    #[error("insufficient stock on {account_id}: requested {requested}, available {available}")]
    InsufficientStock {
        account_id: AccountId,
        requested: i64,
        available: i64,
    },

    #[error("quantity must be positive (got {0})")]
    InvalidQuantity(i64),

    #[error("cannot release {requested} on {account_id}: only {reserved} reserved")]
    InvalidReleaseAmount {
        account_id: AccountId,
        requested: i64,
        reserved: i64,
    },

    #[error("cannot commit {requested} on {account_id}: only {reserved} reserved")]
    InvalidCommitAmount {
        account_id: AccountId,
        requested: i64,
        reserved: i64,
    },

    #[error("adjustment of {delta} on {account_id} rejected (on_hand={on_hand}, reserved={reserved})")]
    InvalidAdjustment {
        account_id: AccountId,
        delta: i64,
        on_hand: i64,
        reserved: i64,
    },

    #[error("reservation {id} is already {state}")]
    HandleAlreadyResolved {
        id: ReservationId,
        state: ReservationState,
    },

    #[error("reservation {0} not found")]
    ReservationNotFound(ReservationId),

    #[error("stock account {0} is busy; lock not acquired in time")]
    Busy(AccountId),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Store(StoreError),
}

impl ReservationError {
    /// Attach the account to a domain rejection.
    pub fn from_stock(account_id: AccountId, err: StockError) -> Self {
        match err {
            StockError::InvalidQuantity(q) => Self::InvalidQuantity(q),
            StockError::InsufficientStock {
                requested,
                available,
            } => Self::InsufficientStock {
                account_id,
                requested,
                available,
            },
            StockError::InvalidReleaseAmount {
                requested,
                reserved,
            } => Self::InvalidReleaseAmount {
                account_id,
                requested,
                reserved,
            },
            StockError::InvalidCommitAmount {
                requested,
                reserved,
            } => Self::InvalidCommitAmount {
                account_id,
                requested,
                reserved,
            },
            StockError::InvalidAdjustment {
                delta,
                on_hand,
                reserved,
            } => Self::InvalidAdjustment {
                account_id,
                delta,
                on_hand,
                reserved,
            },
        }
    }

    /// Worth retrying unchanged after a short wait.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::Conflict(_))
    }
}

impl From<StoreError> for ReservationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => Self::Conflict(msg),
            other => Self::Store(other),
        }
    }
}

impl From<DomainError> for ReservationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::Conflict(msg) => Self::Conflict(msg),
        }
    }
}

impl From<AlreadyResolved> for ReservationError {
    fn from(value: AlreadyResolved) -> Self {
        Self::HandleAlreadyResolved {
            id: value.id,
            state: value.state,
        }
    }
}

impl From<LockTimeout> for ReservationError {
    fn from(value: LockTimeout) -> Self {
        Self::Busy(value.account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_errors_keep_their_numbers() {
        let id = AccountId::generate();
        let err = ReservationError::from_stock(
            id,
            StockError::InsufficientStock {
                requested: 4,
                available: 1,
            },
        );
        assert_eq!(
            err,
            ReservationError::InsufficientStock {
                account_id: id,
                requested: 4,
                available: 1
            }
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn store_concurrency_becomes_retryable_conflict() {
        let err: ReservationError = StoreError::Concurrency("stale".into()).into();
        assert!(matches!(err, ReservationError::Conflict(_)));
        assert!(err.is_retryable());

        let err: ReservationError = StoreError::Poisoned.into();
        assert_eq!(err, ReservationError::Store(StoreError::Poisoned));
    }

    #[test]
    fn lock_timeout_is_busy() {
        let id = AccountId::generate();
        let err: ReservationError = LockTimeout { account_id: id }.into();
        assert_eq!(err, ReservationError::Busy(id));
        assert!(err.is_retryable());
    }
}
