//! `stockkeep-core`: shared building blocks for the reservation core.
//!
//! Identifiers, the domain error model and optimistic versioning. No IO.

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, EntryId, ReservationId};
