//! Reservation manager: the only writer of stock accounts.
//!
//! Every operation follows the same pipeline:
//!
//! ```text
//! lock accounts (ascending id, bounded wait)
//!   ↓
//! load current state from the store
//!   ↓
//! validate + apply on in-memory copies (pure domain rules)
//!   ↓
//! commit one atomic WriteBatch (accounts + ledger + reservations)
//!   ↓
//! unlock, then publish notifications
//! ```
//!
//! A failure at any step before the commit leaves the store untouched.
//! Publication happens after the locks are released and never fails the
//! operation; the ledger remains the source of truth.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use stockkeep_core::{AggregateRoot, ExpectedVersion, ReservationId};
use stockkeep_events::{EventBus, EventEnvelope};
use stockkeep_inventory::{
    AccountId, LedgerEntry, LowStockAlert, NewLedgerEntry, OPENING_BALANCE, Reservation,
    ReservationHandle, ReservationState, STOCK_ACCOUNT_AGGREGATE, StockAccount, StockNotification,
};

use crate::config::ManagerConfig;
use crate::error::ReservationError;
use crate::locks::LockTable;
use crate::store::{StockStore, StoreError, WriteBatch};

/// An account loaded under its lock, plus what is needed to write it back.
struct Loaded {
    account: StockAccount,
    loaded_version: u64,
    was_low: bool,
}

impl Loaded {
    fn new(account: StockAccount) -> Self {
        Self {
            loaded_version: account.version(),
            was_low: account.is_low_stock(),
            account,
        }
    }

    fn write_into(self, batch: &mut WriteBatch, alerts: &mut Vec<LowStockAlert>, at: DateTime<Utc>) {
        if !self.was_low && self.account.is_low_stock() && !self.account.is_archived() {
            alerts.push(LowStockAlert::for_account(&self.account, at));
        }
        batch.push_account(self.account, ExpectedVersion::Exact(self.loaded_version));
    }
}

/// Single entry point for every stock mutation.
///
/// Safe to share between threads (`Arc<ReservationManager<..>>`). Reads that
/// do not need to mutate should go through [`crate::query::StockQuery`],
/// which never takes the account locks.
#[derive(Debug)]
pub struct ReservationManager<S, B> {
    store: S,
    bus: B,
    locks: LockTable,
    config: ManagerConfig,
}

impl<S, B> ReservationManager<S, B> {
    pub fn new(store: S, bus: B, config: ManagerConfig) -> Self {
        Self {
            store,
            bus,
            locks: LockTable::new(),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> ReservationManager<S, B>
where
    S: StockStore,
    B: EventBus<EventEnvelope<StockNotification>>,
{
    /// Open an account under a fresh id. `None` threshold uses the configured default.
    pub fn open_account(
        &self,
        name: impl Into<String>,
        on_hand: i64,
        alert_threshold: Option<i64>,
    ) -> Result<StockAccount, ReservationError> {
        self.open_account_with_id(AccountId::generate(), name, on_hand, alert_threshold)
    }

    /// Open an account under a caller-chosen id (e.g. the catalog's product id).
    ///
    /// A positive opening quantity is recorded as an `Adjust` ledger entry so
    /// that replaying the ledger from creation reproduces the account.
    #[instrument(skip_all, fields(account_id = %id, on_hand = on_hand))]
    pub fn open_account_with_id(
        &self,
        id: AccountId,
        name: impl Into<String>,
        on_hand: i64,
        alert_threshold: Option<i64>,
    ) -> Result<StockAccount, ReservationError> {
        let threshold = alert_threshold.unwrap_or(self.config.default_alert_threshold);
        let account = StockAccount::open(id, name, on_hand, threshold)?;
        let now = Utc::now();

        let locks = self.locks.lock_set(&[id]);
        let guards = locks.acquire(self.config.lock_timeout)?;

        let mut batch = WriteBatch::new();
        batch.push_account(account.clone(), ExpectedVersion::NoRecord);
        if on_hand > 0 {
            batch.push_entry(NewLedgerEntry::adjust(id, on_hand, OPENING_BALANCE, now));
        }
        let committed = self.store.commit(batch).map_err(|err| match err {
            StoreError::Concurrency(_) => {
                ReservationError::Conflict(format!("stock account {id} already exists"))
            }
            other => other.into(),
        })?;
        drop(guards);

        let mut alerts = Vec::new();
        if account.is_low_stock() {
            alerts.push(LowStockAlert::for_account(&account, now));
        }

        debug!(name = account.name(), "stock account opened");
        self.publish(committed, alerts);
        Ok(account)
    }

    /// Reserve `qty` units on one account.
    #[instrument(skip_all, fields(account_id = %account_id, qty = qty, reference = reference))]
    pub fn reserve(
        &self,
        account_id: AccountId,
        qty: i64,
        reference: &str,
    ) -> Result<ReservationHandle, ReservationError> {
        let mut handles = self.reserve_lines(&[(account_id, qty)], reference)?;
        handles
            .pop()
            .ok_or_else(|| ReservationError::Validation("reservation produced no handle".to_string()))
    }

    /// Reserve several lines all-or-nothing (cart checkout).
    ///
    /// Lines for the same account are allowed and accumulate. Handles are
    /// returned in line order.
    #[instrument(skip_all, fields(lines = items.len(), reference = reference))]
    pub fn reserve_batch(
        &self,
        items: &[(AccountId, i64)],
        reference: &str,
    ) -> Result<Vec<ReservationHandle>, ReservationError> {
        self.reserve_lines(items, reference)
    }

    fn reserve_lines(
        &self,
        items: &[(AccountId, i64)],
        reference: &str,
    ) -> Result<Vec<ReservationHandle>, ReservationError> {
        if items.is_empty() {
            return Err(ReservationError::Validation(
                "reservation batch is empty".to_string(),
            ));
        }
        if let Some(&(_, qty)) = items.iter().find(|(_, qty)| *qty <= 0) {
            return Err(ReservationError::InvalidQuantity(qty));
        }

        let ids: Vec<AccountId> = items.iter().map(|(id, _)| *id).collect();
        self.check_active(&ids)?;
        let locks = self.locks.lock_set(&ids);
        let guards = locks.acquire(self.config.lock_timeout)?;

        let mut loaded = BTreeMap::new();
        for id in locks.ids() {
            loaded.insert(id, Loaded::new(self.load_active(id)?));
        }

        let now = Utc::now();
        let mut batch = WriteBatch::new();
        let mut handles = Vec::with_capacity(items.len());

        for &(account_id, qty) in items {
            let slot = loaded
                .get_mut(&account_id)
                .ok_or(ReservationError::AccountNotFound(account_id))?;
            if let Err(err) = slot.account.apply_reserve(qty) {
                debug!(account_id = %account_id, error = %err, "reservation rejected");
                return Err(ReservationError::from_stock(account_id, err));
            }

            let reservation = Reservation::new(account_id, qty, reference, now);
            batch.push_entry(NewLedgerEntry::reserve(
                account_id,
                qty,
                reference,
                reservation.id(),
                now,
            ));
            handles.push(reservation.handle());
            batch.push_reservation(reservation);
        }

        let mut alerts = Vec::new();
        for slot in loaded.into_values() {
            slot.write_into(&mut batch, &mut alerts, now);
        }

        let committed = self.store.commit(batch)?;
        drop(guards);

        debug!(reservations = handles.len(), "stock reserved");
        self.publish(committed, alerts);
        Ok(handles)
    }

    /// Give the reserved units back. Releasing twice is a no-op.
    ///
    /// Releasing a committed reservation is rejected with
    /// `HandleAlreadyResolved`.
    #[instrument(skip_all, fields(reservation_id = %handle.id, account_id = %handle.account_id))]
    pub fn release(&self, handle: &ReservationHandle) -> Result<(), ReservationError> {
        self.release_handle(handle).map(|_| ())
    }

    /// Returns whether this call performed the release.
    fn release_handle(&self, handle: &ReservationHandle) -> Result<bool, ReservationError> {
        self.load_reservation_for(handle)?;
        let locks = self.locks.lock_set(&[handle.account_id]);
        let guards = locks.acquire(self.config.lock_timeout)?;

        let mut reservation = self.load_reservation_for(handle)?;
        match reservation.state() {
            ReservationState::Active => {}
            ReservationState::Released => {
                warn!(reservation_id = %handle.id, "release of an already released reservation ignored");
                return Ok(false);
            }
            state @ ReservationState::Committed => {
                warn!(reservation_id = %handle.id, "release of a committed reservation rejected");
                return Err(ReservationError::HandleAlreadyResolved {
                    id: handle.id,
                    state,
                });
            }
        }

        let mut slot = Loaded::new(self.load_existing(handle.account_id)?);
        let qty = reservation.quantity();
        slot.account
            .apply_release(qty)
            .map_err(|err| ReservationError::from_stock(handle.account_id, err))?;

        let now = Utc::now();
        reservation.mark_released(now)?;

        let mut batch = WriteBatch::new();
        batch.push_entry(NewLedgerEntry::release(
            handle.account_id,
            qty,
            reservation.reference(),
            reservation.id(),
            now,
        ));
        batch.push_reservation(reservation);
        let mut alerts = Vec::new();
        slot.write_into(&mut batch, &mut alerts, now);

        let committed = self.store.commit(batch)?;
        drop(guards);

        debug!(qty, "reservation released");
        self.publish(committed, alerts);
        Ok(true)
    }

    /// Turn the reservation into a permanent deduction (sale finalized).
    #[instrument(skip_all, fields(reservation_id = %handle.id, account_id = %handle.account_id))]
    pub fn commit(&self, handle: &ReservationHandle) -> Result<(), ReservationError> {
        self.load_reservation_for(handle)?;
        let locks = self.locks.lock_set(&[handle.account_id]);
        let guards = locks.acquire(self.config.lock_timeout)?;

        let mut reservation = self.load_reservation_for(handle)?;
        if !reservation.is_active() {
            warn!(
                reservation_id = %handle.id,
                state = %reservation.state(),
                "commit of an already resolved reservation rejected"
            );
            return Err(ReservationError::HandleAlreadyResolved {
                id: handle.id,
                state: reservation.state(),
            });
        }

        let mut slot = Loaded::new(self.load_existing(handle.account_id)?);
        let qty = reservation.quantity();
        slot.account
            .apply_commit(qty)
            .map_err(|err| ReservationError::from_stock(handle.account_id, err))?;

        let now = Utc::now();
        reservation.mark_committed(now)?;

        let mut batch = WriteBatch::new();
        batch.push_entry(NewLedgerEntry::commit(
            handle.account_id,
            qty,
            reservation.reference(),
            reservation.id(),
            now,
        ));
        batch.push_reservation(reservation);
        let mut alerts = Vec::new();
        slot.write_into(&mut batch, &mut alerts, now);

        let committed = self.store.commit(batch)?;
        drop(guards);

        debug!(qty, "reservation committed");
        self.publish(committed, alerts);
        Ok(())
    }

    /// Administrative on-hand correction, independent of any reservation.
    #[instrument(skip_all, fields(account_id = %account_id, delta = delta, reason = reason))]
    pub fn adjust(
        &self,
        account_id: AccountId,
        delta: i64,
        reason: &str,
    ) -> Result<LedgerEntry, ReservationError> {
        if reason.trim().is_empty() {
            return Err(ReservationError::Validation(
                "adjustment reason cannot be empty".to_string(),
            ));
        }

        self.check_active(&[account_id])?;
        let locks = self.locks.lock_set(&[account_id]);
        let guards = locks.acquire(self.config.lock_timeout)?;

        let mut slot = Loaded::new(self.load_active(account_id)?);
        slot.account
            .apply_adjust(delta)
            .map_err(|err| ReservationError::from_stock(account_id, err))?;

        let now = Utc::now();
        let mut batch = WriteBatch::new();
        batch.push_entry(NewLedgerEntry::adjust(account_id, delta, reason, now));
        let mut alerts = Vec::new();
        slot.write_into(&mut batch, &mut alerts, now);

        let committed = self.store.commit(batch)?;
        drop(guards);

        let entry = committed.first().cloned().ok_or_else(|| {
            ReservationError::Store(StoreError::InvalidBatch(
                "adjustment entry was not written".to_string(),
            ))
        })?;

        debug!(sequence = entry.sequence(), "stock adjusted");
        self.publish(committed, alerts);
        Ok(entry)
    }

    #[instrument(skip_all, fields(account_id = %account_id, threshold = threshold))]
    pub fn set_alert_threshold(
        &self,
        account_id: AccountId,
        threshold: i64,
    ) -> Result<StockAccount, ReservationError> {
        self.check_active(&[account_id])?;
        let locks = self.locks.lock_set(&[account_id]);
        let guards = locks.acquire(self.config.lock_timeout)?;

        let mut slot = Loaded::new(self.load_active(account_id)?);
        slot.account.set_alert_threshold(threshold)?;
        let updated = slot.account.clone();

        let now = Utc::now();
        let mut batch = WriteBatch::new();
        let mut alerts = Vec::new();
        slot.write_into(&mut batch, &mut alerts, now);

        let committed = self.store.commit(batch)?;
        drop(guards);

        self.publish(committed, alerts);
        Ok(updated)
    }

    /// Soft-close an account. Rejected while any units are reserved.
    #[instrument(skip_all, fields(account_id = %account_id))]
    pub fn archive_account(&self, account_id: AccountId) -> Result<(), ReservationError> {
        self.check_active(&[account_id])?;
        let locks = self.locks.lock_set(&[account_id]);
        let guards = locks.acquire(self.config.lock_timeout)?;

        let mut slot = Loaded::new(self.load_active(account_id)?);
        slot.account.archive()?;

        let mut batch = WriteBatch::new();
        batch.push_account(slot.account, ExpectedVersion::Exact(slot.loaded_version));
        self.store.commit(batch)?;
        drop(guards);

        // Archived accounts reject every mutation, so the lock is no longer needed.
        self.locks.evict(account_id);
        info!("stock account archived");
        Ok(())
    }

    /// Release every active reservation carrying `reference` (order cancelled,
    /// cart abandoned). Returns how many this call released.
    ///
    /// Stops at the first hard error; reservations released before it stay
    /// released, and calling again is safe.
    #[instrument(skip_all, fields(reference = reference))]
    pub fn release_reference(&self, reference: &str) -> Result<usize, ReservationError> {
        let handles: Vec<ReservationHandle> = self
            .store
            .list_reservations(reference)?
            .into_iter()
            .filter(Reservation::is_active)
            .map(|r| r.handle())
            .collect();

        let mut released = 0;
        for handle in &handles {
            match self.release_handle(handle) {
                Ok(true) => released += 1,
                Ok(false) => {}
                // Committed by someone else since the listing.
                Err(ReservationError::HandleAlreadyResolved { .. }) => {}
                Err(err) => return Err(err),
            }
        }

        debug!(released, "reservations released by reference");
        Ok(released)
    }

    pub fn reservation(&self, id: ReservationId) -> Result<Reservation, ReservationError> {
        self.store
            .load_reservation(id)?
            .ok_or(ReservationError::ReservationNotFound(id))
    }

    /// Rejects unknown or archived accounts before a lock slot is created for
    /// them. Accounts are never deleted and archival is final; the load under
    /// the lock remains the authoritative check.
    fn check_active(&self, ids: &[AccountId]) -> Result<(), ReservationError> {
        ids.iter().try_for_each(|&id| self.load_active(id).map(drop))
    }

    fn load_existing(&self, id: AccountId) -> Result<StockAccount, ReservationError> {
        self.store
            .load_account(id)?
            .ok_or(ReservationError::AccountNotFound(id))
    }

    fn load_active(&self, id: AccountId) -> Result<StockAccount, ReservationError> {
        let account = self.load_existing(id)?;
        if account.is_archived() {
            return Err(ReservationError::AccountArchived(id));
        }
        Ok(account)
    }

    fn load_reservation_for(&self, handle: &ReservationHandle) -> Result<Reservation, ReservationError> {
        let reservation = self
            .store
            .load_reservation(handle.id)?
            .ok_or(ReservationError::ReservationNotFound(handle.id))?;

        if reservation.account_id() != handle.account_id {
            return Err(ReservationError::Validation(format!(
                "handle names account {} but reservation {} belongs to {}",
                handle.account_id,
                handle.id,
                reservation.account_id()
            )));
        }
        Ok(reservation)
    }

    fn publish(&self, committed: Vec<LedgerEntry>, alerts: Vec<LowStockAlert>) {
        let mut last_sequence: HashMap<AccountId, u64> = HashMap::new();

        for entry in committed {
            let account_id = entry.account_id();
            let sequence = entry.sequence();
            last_sequence.insert(account_id, sequence);
            self.emit(account_id, sequence, StockNotification::Ledger(entry));
        }

        for alert in alerts {
            info!(
                account_id = %alert.account_id,
                available = alert.available,
                threshold = alert.alert_threshold,
                "stock at or below alert threshold"
            );
            let sequence = last_sequence.get(&alert.account_id).copied().unwrap_or(0);
            self.emit(alert.account_id, sequence, StockNotification::LowStock(alert));
        }
    }

    fn emit(&self, account_id: AccountId, sequence: u64, notification: StockNotification) {
        let envelope = EventEnvelope::wrap(
            account_id.0,
            STOCK_ACCOUNT_AGGREGATE,
            sequence,
            notification,
        );
        if let Err(err) = self.bus.publish(envelope) {
            warn!(account_id = %account_id, error = ?err, "failed to publish stock notification");
        }
    }
}
