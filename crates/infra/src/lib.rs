//! Infrastructure layer: locking, storage, the reservation manager and queries.

pub mod config;
pub mod error;
pub mod locks;
pub mod manager;
pub mod query;
pub mod store;

mod integration_tests;

pub use config::ManagerConfig;
pub use error::ReservationError;
pub use manager::ReservationManager;
pub use query::{LowStockItem, QueryError, Reconciliation, StockQuery};
pub use store::{InMemoryStockStore, StockStore, StoreError, WriteBatch};
