//! Integration tests for the reservation pipeline.
//!
//! Tests: Manager → Locks → StockStore → EventBus, read back through StockQuery
//!
//! Verifies:
//! - Concurrent callers never oversell
//! - Batches land whole or not at all
//! - Overlapping batches in opposite line order never deadlock
//! - Lock timeouts surface as `Busy`
//! - The ledger replays to the stored quantities

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;
    use std::time::Duration;

    use proptest::prelude::*;

    use stockkeep_core::ReservationId;
    use stockkeep_events::{Event, EventBus, EventEnvelope, InMemoryEventBus, Subscription};
    use stockkeep_inventory::{
        AccountId, LedgerEntry, LedgerKind, Reservation, STOCK_ACCOUNT_AGGREGATE, StockAccount,
        StockNotification, replay,
    };

    use crate::config::ManagerConfig;
    use crate::error::ReservationError;
    use crate::manager::ReservationManager;
    use crate::query::StockQuery;
    use crate::store::{AccountSnapshot, InMemoryStockStore, StockStore, StoreError, WriteBatch};

    type Bus = InMemoryEventBus<EventEnvelope<StockNotification>>;
    type Manager<S> = ReservationManager<Arc<S>, Arc<Bus>>;

    /// In-memory store with switches for injected failures and a commit gate.
    #[derive(Default)]
    struct ScriptedStore {
        inner: InMemoryStockStore,
        fail_commits: AtomicBool,
        gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl ScriptedStore {
        /// Block the next commit until `release` fires; `entered` fires once it is blocked.
        fn hold_next_commit(&self) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
            let (entered_tx, entered_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();
            *self.gate.lock().unwrap() = Some((entered_tx, release_rx));
            (entered_rx, release_tx)
        }
    }

    impl StockStore for ScriptedStore {
        fn commit(&self, batch: WriteBatch) -> Result<Vec<LedgerEntry>, StoreError> {
            if self.fail_commits.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("disk on fire".to_string()));
            }
            let gate = self.gate.lock().unwrap().take();
            if let Some((entered, release)) = gate {
                entered.send(()).unwrap();
                let _ = release.recv();
            }
            self.inner.commit(batch)
        }

        fn load_account(&self, id: AccountId) -> Result<Option<StockAccount>, StoreError> {
            self.inner.load_account(id)
        }

        fn list_accounts(&self) -> Result<Vec<StockAccount>, StoreError> {
            self.inner.list_accounts()
        }

        fn load_ledger(&self, id: AccountId) -> Result<Vec<LedgerEntry>, StoreError> {
            self.inner.load_ledger(id)
        }

        fn load_snapshot(&self, id: AccountId) -> Result<Option<AccountSnapshot>, StoreError> {
            self.inner.load_snapshot(id)
        }

        fn load_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
            self.inner.load_reservation(id)
        }

        fn list_reservations(&self, reference: &str) -> Result<Vec<Reservation>, StoreError> {
            self.inner.list_reservations(reference)
        }
    }

    /// Bus that refuses every message.
    struct BrokenBus;

    impl<M> EventBus<M> for BrokenBus {
        type Error = String;

        fn publish(&self, _message: M) -> Result<(), Self::Error> {
            Err("broker unreachable".to_string())
        }

        fn subscribe(&self) -> Subscription<M> {
            let (_tx, rx) = mpsc::channel();
            Subscription::new(rx)
        }
    }

    fn setup_with<S: StockStore>(store: S, config: ManagerConfig) -> (Arc<Manager<S>>, StockQuery<Arc<S>>, Arc<Bus>) {
        stockkeep_observability::init_test();
        let store = Arc::new(store);
        let bus = Arc::new(Bus::new());
        let manager = Arc::new(ReservationManager::new(store.clone(), bus.clone(), config));
        (manager, StockQuery::new(store), bus)
    }

    fn setup() -> (Arc<Manager<InMemoryStockStore>>, StockQuery<Arc<InMemoryStockStore>>, Arc<Bus>) {
        setup_with(InMemoryStockStore::new(), ManagerConfig::default())
    }

    fn quantities<S: StockStore>(query: &StockQuery<S>, id: AccountId) -> (i64, i64) {
        let account = query.account(id).unwrap();
        (account.on_hand(), account.reserved())
    }

    fn concurrent_single_unit_reserves(callers: usize) -> (usize, usize, (i64, i64)) {
        let (manager, query, _bus) = setup_with(
            InMemoryStockStore::new(),
            ManagerConfig::default().with_lock_timeout(Duration::from_secs(5)),
        );
        let id = manager.open_account("Limited edition", 10, None).unwrap().id_typed();
        let start = Arc::new(Barrier::new(callers));

        let workers: Vec<_> = (0..callers)
            .map(|n| {
                let manager = Arc::clone(&manager);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    manager.reserve(id, 1, &format!("cart-{n}"))
                })
            })
            .collect();

        let mut ok = 0;
        let mut insufficient = 0;
        for worker in workers {
            match worker.join().unwrap() {
                Ok(_) => ok += 1,
                Err(ReservationError::InsufficientStock { .. }) => insufficient += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        (ok, insufficient, quantities(&query, id))
    }

    #[test]
    fn concurrent_reserves_never_oversell() {
        let (ok, insufficient, (on_hand, reserved)) = concurrent_single_unit_reserves(32);
        assert_eq!(ok, 10);
        assert_eq!(insufficient, 22);
        assert_eq!((on_hand, reserved), (10, 10));
    }

    #[test]
    fn concurrent_reserves_below_capacity_all_succeed() {
        let (ok, insufficient, (_, reserved)) = concurrent_single_unit_reserves(6);
        assert_eq!(ok, 6);
        assert_eq!(insufficient, 0);
        assert_eq!(reserved, 6);
    }

    #[test]
    fn batch_with_insufficient_last_line_changes_nothing() {
        let (manager, query, bus) = setup();
        let a = manager.open_account("A", 10, None).unwrap().id_typed();
        let b = manager.open_account("B", 10, None).unwrap().id_typed();
        let c = manager.open_account("C", 1, None).unwrap().id_typed();
        let sub = bus.subscribe();

        let err = manager
            .reserve_batch(&[(a, 3), (b, 4), (c, 2)], "checkout-1")
            .unwrap_err();
        assert_eq!(
            err,
            ReservationError::InsufficientStock {
                account_id: c,
                requested: 2,
                available: 1
            }
        );

        for id in [a, b, c] {
            assert_eq!(query.account(id).unwrap().reserved(), 0);
            assert_eq!(query.ledger(id).unwrap().len(), 1);
        }
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn batch_with_unknown_last_line_changes_nothing() {
        let (manager, query, _bus) = setup();
        let a = manager.open_account("A", 10, None).unwrap().id_typed();
        let missing = AccountId::generate();

        let err = manager.reserve_batch(&[(a, 3), (missing, 1)], "checkout-2").unwrap_err();
        assert_eq!(err, ReservationError::AccountNotFound(missing));
        assert_eq!(quantities(&query, a), (10, 0));
    }

    #[test]
    fn batch_survives_failing_store_commit() {
        let (manager, query, bus) = setup_with(ScriptedStore::default(), ManagerConfig::default());
        let a = manager.open_account("A", 10, None).unwrap().id_typed();
        let b = manager.open_account("B", 10, None).unwrap().id_typed();
        let sub = bus.subscribe();

        manager.store().fail_commits.store(true, Ordering::SeqCst);
        let err = manager.reserve_batch(&[(a, 3), (b, 4)], "checkout-3").unwrap_err();
        assert!(matches!(err, ReservationError::Store(StoreError::Unavailable(_))));
        assert!(!err.is_retryable());

        assert_eq!(quantities(&query, a), (10, 0));
        assert_eq!(quantities(&query, b), (10, 0));
        assert!(sub.drain().is_empty());

        manager.store().fail_commits.store(false, Ordering::SeqCst);
        let handles = manager.reserve_batch(&[(a, 3), (b, 4)], "checkout-3").unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(quantities(&query, b), (10, 4));
    }

    #[test]
    fn batch_lines_for_the_same_account_accumulate() {
        let (manager, query, _bus) = setup();
        let a = manager.open_account("A", 5, None).unwrap().id_typed();

        assert!(matches!(
            manager.reserve_batch(&[(a, 3), (a, 3)], "dup"),
            Err(ReservationError::InsufficientStock { available: 2, .. })
        ));
        let handles = manager.reserve_batch(&[(a, 3), (a, 2)], "dup").unwrap();
        assert_eq!(handles.iter().map(|h| h.quantity).collect::<Vec<_>>(), vec![3, 2]);
        assert_eq!(quantities(&query, a), (5, 5));
    }

    #[test]
    fn opposite_order_batches_do_not_deadlock() {
        const WORKERS: usize = 8;
        const ROUNDS: usize = 200;

        let (manager, query, _bus) = setup_with(
            InMemoryStockStore::new(),
            ManagerConfig::default().with_lock_timeout(Duration::from_secs(5)),
        );
        let a = manager.open_account("A", 100, None).unwrap().id_typed();
        let b = manager.open_account("B", 100, None).unwrap().id_typed();
        let start = Arc::new(Barrier::new(WORKERS));

        let workers: Vec<_> = (0..WORKERS)
            .map(|n| {
                let manager = Arc::clone(&manager);
                let start = Arc::clone(&start);
                let lines = if n % 2 == 0 { [(a, 1), (b, 1)] } else { [(b, 1), (a, 1)] };
                thread::spawn(move || {
                    start.wait();
                    for round in 0..ROUNDS {
                        let handles = manager.reserve_batch(&lines, &format!("cart-{n}-{round}"))?;
                        for handle in &handles {
                            manager.release(handle)?;
                        }
                    }
                    Ok::<(), ReservationError>(())
                })
            })
            .collect();

        for worker in workers {
            if let Err(err) = worker.join().unwrap() {
                panic!("worker failed: {err}");
            }
        }

        for id in [a, b] {
            assert_eq!(quantities(&query, id), (100, 0));
            assert!(query.reconcile(id).unwrap().is_consistent());
            assert_eq!(query.ledger(id).unwrap().len(), 1 + 2 * WORKERS * ROUNDS);
        }
    }

    #[test]
    fn double_release_is_idempotent() {
        let (manager, query, _bus) = setup();
        let id = manager.open_account("Headphones", 10, None).unwrap().id_typed();
        let handle = manager.reserve(id, 4, "order-5").unwrap();

        manager.release(&handle).unwrap();
        manager.release(&handle).unwrap();

        assert_eq!(quantities(&query, id), (10, 0));
        let releases = query
            .ledger(id)
            .unwrap()
            .iter()
            .filter(|e| e.kind() == LedgerKind::Release)
            .count();
        assert_eq!(releases, 1);
    }

    #[test]
    fn commit_consumes_reserved_stock() {
        let (manager, query, _bus) = setup();
        let id = manager.open_account("Keyboard", 20, None).unwrap().id_typed();

        let handle = manager.reserve(id, 5, "order-6").unwrap();
        manager.commit(&handle).unwrap();

        assert_eq!(quantities(&query, id), (15, 0));
        assert_eq!(query.available_quantity(id).unwrap(), 15);
    }

    #[test]
    fn low_stock_follows_available_quantity() {
        let (manager, query, bus) = setup();
        let id = manager.open_account("Desk lamp", 10, Some(3)).unwrap().id_typed();
        manager.reserve(id, 2, "order-7").unwrap();
        let sub = bus.subscribe();

        assert_eq!(query.available_quantity(id).unwrap(), 8);
        assert!(!query.is_low_stock(id).unwrap());
        assert!(query.list_low_stock().unwrap().is_empty());

        manager.reserve(id, 6, "order-8").unwrap();
        assert_eq!(query.available_quantity(id).unwrap(), 2);
        assert!(query.is_low_stock(id).unwrap());

        let report = query.list_low_stock().unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].account_id, id);
        assert_eq!(report[0].available, 2);

        // Still low: no second alert.
        manager.reserve(id, 1, "order-9").unwrap();

        let alerts: Vec<_> = sub
            .drain()
            .into_iter()
            .filter(|env| env.event_type() == "inventory.stock.low")
            .collect();
        assert_eq!(alerts.len(), 1);
        match alerts[0].payload() {
            StockNotification::LowStock(alert) => {
                assert_eq!(alert.account_id, id);
                assert_eq!(alert.available, 2);
                assert_eq!(alert.alert_threshold, 3);
            }
            other => panic!("expected low stock alert, got {other:?}"),
        }
    }

    #[test]
    fn ledger_replay_reconstructs_quantities() {
        let (manager, query, _bus) = setup();
        let id = manager.open_account("Monitor", 12, None).unwrap().id_typed();

        let a = manager.reserve(id, 5, "o-1").unwrap();
        let b = manager.reserve(id, 3, "o-2").unwrap();
        manager.commit(&a).unwrap();
        manager.adjust(id, 6, "delivery").unwrap();
        manager.release(&b).unwrap();
        manager.reserve(id, 4, "o-3").unwrap();
        manager.adjust(id, -2, "damaged").unwrap();

        let ledger = query.ledger(id).unwrap();
        let sequences: Vec<u64> = ledger.iter().map(|e| e.sequence()).collect();
        assert_eq!(sequences, (1..=ledger.len() as u64).collect::<Vec<_>>());

        let replayed = replay(&ledger).unwrap();
        assert_eq!((replayed.on_hand, replayed.reserved), quantities(&query, id));
        assert_eq!(quantities(&query, id), (11, 4));
        assert!(query.reconcile(id).unwrap().is_consistent());
    }

    #[test]
    fn lock_timeout_reports_busy() {
        let (manager, query, _bus) = setup_with(
            ScriptedStore::default(),
            ManagerConfig::default().with_lock_timeout(Duration::from_millis(30)),
        );
        let id = manager.open_account("Router", 10, None).unwrap().id_typed();

        let (entered, release) = manager.store().hold_next_commit();
        let holder = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.reserve(id, 2, "slow"))
        };
        entered.recv().unwrap();

        let err = manager.reserve(id, 1, "impatient").unwrap_err();
        assert_eq!(err, ReservationError::Busy(id));
        assert!(err.is_retryable());

        // Queries do not wait for the lock.
        assert_eq!(quantities(&query, id), (10, 0));

        release.send(()).unwrap();
        holder.join().unwrap().unwrap();
        manager.reserve(id, 1, "patient").unwrap();
        assert_eq!(quantities(&query, id), (10, 3));
    }

    #[test]
    fn notifications_follow_the_ledger() {
        let (manager, _query, bus) = setup();
        let id = manager.open_account("Webcam", 10, None).unwrap().id_typed();
        let sub = bus.subscribe();

        let handle = manager.reserve(id, 2, "order-10").unwrap();
        manager.commit(&handle).unwrap();

        let published = sub.drain();
        assert_eq!(published.len(), 2);
        let types: Vec<_> = published.iter().map(|env| env.event_type()).collect();
        assert_eq!(types, vec!["inventory.stock.reserved", "inventory.stock.committed"]);

        for (env, expected_seq) in published.iter().zip([2u64, 3]) {
            assert_eq!(env.aggregate_id(), id.0);
            assert_eq!(env.aggregate_type(), STOCK_ACCOUNT_AGGREGATE);
            assert_eq!(env.sequence_number(), expected_seq);
            assert_eq!(env.payload().account_id(), id);
            assert_eq!(env.payload().version(), 1);
        }
        assert_ne!(published[0].event_id(), published[1].event_id());

        // Wire shape seen by downstream consumers.
        let json = serde_json::to_value(&published[0]).unwrap();
        assert_eq!(json["aggregate_type"], STOCK_ACCOUNT_AGGREGATE);
        assert_eq!(json["sequence_number"], 2);
        assert_eq!(json["payload"]["Ledger"]["kind"], "reserve");
        assert_eq!(json["payload"]["Ledger"]["delta"], 2);
        assert_eq!(json["payload"]["Ledger"]["reference"], "order-10");
    }

    #[test]
    fn publish_failure_does_not_fail_the_mutation() {
        let store = Arc::new(InMemoryStockStore::new());
        let manager = ReservationManager::new(store.clone(), BrokenBus, ManagerConfig::default());
        let id = manager.open_account("Cable", 3, None).unwrap().id_typed();

        let handle = manager.reserve(id, 3, "order-11").unwrap();
        manager.commit(&handle).unwrap();

        let account = store.load_account(id).unwrap().unwrap();
        assert_eq!((account.on_hand(), account.reserved()), (0, 0));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Reserve(usize, i64),
        ReleaseOldest,
        CommitNewest,
        Adjust(usize, i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..2, 1i64..8).prop_map(|(a, q)| Op::Reserve(a, q)),
            Just(Op::ReleaseOldest),
            Just(Op::CommitNewest),
            (0usize..2, -6i64..6).prop_map(|(a, d)| Op::Adjust(a, d)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: whatever the manager accepts or rejects, stored
        /// quantities stay within `0 <= reserved <= on_hand` and match the
        /// ledger replay.
        #[test]
        fn manager_preserves_invariant(
            opening in prop::collection::vec(0i64..20, 2),
            ops in prop::collection::vec(op_strategy(), 0..40)
        ) {
            let (manager, query, _bus) = setup();
            let ids: Vec<AccountId> = opening
                .iter()
                .map(|qty| manager.open_account("Item", *qty, None).unwrap().id_typed())
                .collect();
            let mut handles = Vec::new();

            for op in ops {
                match op {
                    Op::Reserve(a, qty) => {
                        if let Ok(h) = manager.reserve(ids[a], qty, "prop") {
                            handles.push(h);
                        }
                    }
                    Op::ReleaseOldest => {
                        if !handles.is_empty() {
                            let h = handles.remove(0);
                            prop_assert!(manager.release(&h).is_ok());
                        }
                    }
                    Op::CommitNewest => {
                        if let Some(h) = handles.pop() {
                            prop_assert!(manager.commit(&h).is_ok());
                        }
                    }
                    Op::Adjust(a, delta) => {
                        let _ = manager.adjust(ids[a], delta, "count");
                    }
                }

                for id in &ids {
                    let (on_hand, reserved) = quantities(&query, *id);
                    prop_assert!(0 <= reserved && reserved <= on_hand);
                }
            }

            for id in &ids {
                prop_assert!(query.reconcile(*id).unwrap().is_consistent());
            }
        }
    }
}
