use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockkeep_core::ReservationId;

use crate::account::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    Active,
    Committed,
    Released,
}

impl core::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ReservationState::Active => "active",
            ReservationState::Committed => "committed",
            ReservationState::Released => "released",
        };
        f.write_str(s)
    }
}

/// What callers hold on to between reserving and committing / releasing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationHandle {
    pub id: ReservationId,
    pub account_id: AccountId,
    pub quantity: i64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("reservation {id} is already {state}")]
pub struct AlreadyResolved {
    pub id: ReservationId,
    pub state: ReservationState,
}

/// Persisted record behind a [`ReservationHandle`].
///
/// Moves from `Active` to exactly one terminal state. No expiry: abandoned
/// reservations stay active until someone releases them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    id: ReservationId,
    account_id: AccountId,
    quantity: i64,
    reference: String,
    state: ReservationState,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn new(
        account_id: AccountId,
        quantity: i64,
        reference: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            account_id,
            quantity,
            reference: reference.into(),
            state: ReservationState::Active,
            created_at,
            resolved_at: None,
        }
    }

    pub fn id(&self) -> ReservationId {
        self.id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn state(&self) -> ReservationState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    pub fn is_active(&self) -> bool {
        self.state == ReservationState::Active
    }

    pub fn handle(&self) -> ReservationHandle {
        ReservationHandle {
            id: self.id,
            account_id: self.account_id,
            quantity: self.quantity,
        }
    }

    pub fn mark_committed(&mut self, at: DateTime<Utc>) -> Result<(), AlreadyResolved> {
        self.resolve(ReservationState::Committed, at)
    }

    pub fn mark_released(&mut self, at: DateTime<Utc>) -> Result<(), AlreadyResolved> {
        self.resolve(ReservationState::Released, at)
    }

    fn resolve(&mut self, to: ReservationState, at: DateTime<Utc>) -> Result<(), AlreadyResolved> {
        if !self.is_active() {
            return Err(AlreadyResolved {
                id: self.id,
                state: self.state,
            });
        }
        self.state = to;
        self.resolved_at = Some(at);
        Ok(())
    }
}
