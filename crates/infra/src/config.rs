//! Reservation manager configuration.
//!
//! Loaded from environment variables with defaults for anything unset or
//! unparsable.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const LOCK_TIMEOUT_ENV: &str = "STOCKKEEP_LOCK_TIMEOUT_MS";
pub const DEFAULT_ALERT_THRESHOLD_ENV: &str = "STOCKKEEP_DEFAULT_ALERT_THRESHOLD";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Longest a caller waits for one account lock before getting `Busy`.
    pub lock_timeout: Duration,
    /// Threshold given to accounts opened without an explicit one.
    pub default_alert_threshold: i64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(250),
            default_alert_threshold: 0,
        }
    }
}

impl ManagerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment, file, test map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            lock_timeout: lookup(LOCK_TIMEOUT_ENV)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            default_alert_threshold: lookup(DEFAULT_ALERT_THRESHOLD_ENV)
                .and_then(|s| s.trim().parse::<i64>().ok())
                .filter(|t| *t >= 0)
                .unwrap_or(defaults.default_alert_threshold),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_default_alert_threshold(mut self, threshold: i64) -> Self {
        self.default_alert_threshold = threshold;
        self
    }
}
