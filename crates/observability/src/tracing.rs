//! Tracing/logging initialization.
//!
//! JSON lines with timestamps, filtered through `RUST_LOG`. Only the first
//! successful initialization in a process takes effect.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObservabilityError {
    #[error("invalid log filter '{directives}': {reason}")]
    InvalidFilter { directives: String, reason: String },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Initialize tracing/logging for the process from `RUST_LOG`.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = install_json(filter);
}

/// Like [`init`], but with explicit filter directives (e.g. `"stockkeep_infra=debug"`)
/// and reporting instead of swallowing failures.
pub fn try_init_with(directives: &str) -> Result<(), ObservabilityError> {
    let filter = EnvFilter::try_new(directives).map_err(|err| ObservabilityError::InvalidFilter {
        directives: directives.to_string(),
        reason: err.to_string(),
    })?;
    install_json(filter)
}

fn install_json(filter: EnvFilter) -> Result<(), ObservabilityError> {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init()
        .map_err(|_| ObservabilityError::AlreadyInitialized)
}

/// Human-readable output captured by the test harness. Defaults to `debug`.
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
