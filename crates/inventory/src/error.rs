use thiserror::Error;

/// Rejection of a proposed quantity change on a single stock account.
///
/// Returned by the pure `apply_*` operations; the account is untouched
/// whenever one of these is produced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    #[error("quantity must be positive (got {0})")]
    InvalidQuantity(i64),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("cannot release {requested}: only {reserved} reserved")]
    InvalidReleaseAmount { requested: i64, reserved: i64 },

    #[error("cannot commit {requested}: only {reserved} reserved")]
    InvalidCommitAmount { requested: i64, reserved: i64 },

    #[error("adjustment of {delta} would leave on-hand below reserved (on_hand={on_hand}, reserved={reserved})")]
    InvalidAdjustment { delta: i64, on_hand: i64, reserved: i64 },
}
