//! Inventory reservation domain.
//!
//! Stock accounts, their append-only ledger and reservation records,
//! implemented as deterministic domain logic (no IO, no locking, no storage).

pub mod account;
pub mod error;
pub mod event;
pub mod ledger;
pub mod reservation;

pub use account::{AccountId, StockAccount};
pub use error::StockError;
pub use event::{LowStockAlert, STOCK_ACCOUNT_AGGREGATE, StockNotification};
pub use ledger::{
    Balance, LedgerEntry, LedgerKind, NewLedgerEntry, OPENING_BALANCE, ReplayError, replay,
    replay_until,
};
pub use reservation::{AlreadyResolved, Reservation, ReservationHandle, ReservationState};
