//! `partledger-core`: domain foundation shared by the ledger and purchasing crates.
//!
//! Pure building blocks only: identifiers, the domain error model, aggregate
//! and entity traits, and the event contract. No IO lives here.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod event;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use event::Event;
pub use id::{AggregateId, TenantId, UserId};
pub use value_object::ValueObject;
