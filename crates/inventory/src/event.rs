use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockkeep_events::Event;

use crate::account::{AccountId, StockAccount};
use crate::ledger::{LedgerEntry, LedgerKind};

/// Aggregate type recorded on every published envelope.
pub const STOCK_ACCOUNT_AGGREGATE: &str = "inventory.stock_account";

/// Raised when an account's available quantity drops to or below its threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub account_id: AccountId,
    pub name: String,
    pub available: i64,
    pub alert_threshold: i64,
    pub occurred_at: DateTime<Utc>,
}

impl LowStockAlert {
    pub fn for_account(account: &StockAccount, occurred_at: DateTime<Utc>) -> Self {
        Self {
            account_id: account.id_typed(),
            name: account.name().to_string(),
            available: account.available(),
            alert_threshold: account.alert_threshold(),
            occurred_at,
        }
    }
}

/// Everything the reservation core publishes after a durable write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockNotification {
    Ledger(LedgerEntry),
    LowStock(LowStockAlert),
}

impl StockNotification {
    pub fn account_id(&self) -> AccountId {
        match self {
            StockNotification::Ledger(e) => e.account_id(),
            StockNotification::LowStock(a) => a.account_id,
        }
    }
}

impl Event for StockNotification {
    fn event_type(&self) -> &'static str {
        match self {
            StockNotification::Ledger(e) => match e.kind() {
                LedgerKind::Reserve => "inventory.stock.reserved",
                LedgerKind::Release => "inventory.stock.released",
                LedgerKind::Commit => "inventory.stock.committed",
                LedgerKind::Adjust => "inventory.stock.adjusted",
            },
            StockNotification::LowStock(_) => "inventory.stock.low",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockNotification::Ledger(e) => e.occurred_at(),
            StockNotification::LowStock(a) => a.occurred_at,
        }
    }
}
