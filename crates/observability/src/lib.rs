//! Process-wide tracing setup shared by every stockkeep binary and test suite.

pub mod tracing;

pub use self::tracing::{DEFAULT_FILTER, ObservabilityError, init, init_test, try_init_with};
