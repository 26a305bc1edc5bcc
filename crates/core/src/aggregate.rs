//! Aggregate traits and the optimistic concurrency expectation used by stores.

use crate::error::{DomainError, DomainResult};

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Stores use it as the compare-and-swap token when persisting: a save is
    /// accepted only if the stored row is still at the version it was loaded at.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for a versioned row or aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking.
    Any,
    /// The row must not exist yet.
    Absent,
    /// Require the row to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation for a row loaded at `version`, where 0 means "never stored".
    pub fn from_loaded(version: u64) -> Self {
        if version == 0 {
            ExpectedVersion::Absent
        } else {
            ExpectedVersion::Exact(version)
        }
    }

    /// `actual` is `None` when the row does not exist.
    pub fn matches(self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (ExpectedVersion::Any, _) => true,
            (ExpectedVersion::Absent, None) => true,
            (ExpectedVersion::Exact(v), Some(a)) => v == a,
            _ => false,
        }
    }

    pub fn check(self, actual: Option<u64>) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` validates and returns events.
/// - **State mutation**: `apply(&mut self, event)` evolves state.
///
/// Because every precondition is checked in `handle` before any event exists,
/// a rejected command leaves the aggregate untouched.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event (+1 version per event).
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_matches_only_missing_rows() {
        assert!(ExpectedVersion::Absent.matches(None));
        assert!(!ExpectedVersion::Absent.matches(Some(1)));
    }

    #[test]
    fn exact_rejects_stale_version() {
        assert!(ExpectedVersion::Exact(3).matches(Some(3)));
        let err = ExpectedVersion::Exact(3).check(Some(4)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn from_loaded_treats_zero_as_new_row() {
        assert_eq!(ExpectedVersion::from_loaded(0), ExpectedVersion::Absent);
        assert_eq!(ExpectedVersion::from_loaded(2), ExpectedVersion::Exact(2));
    }
}
