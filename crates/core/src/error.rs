//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only. Every message names the violated
/// precondition so callers can surface it as-is.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Missing or malformed input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced record does not exist for the tenant.
    #[error("not found: {0}")]
    NotFound(String),

    /// The current state does not permit the requested transition.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// A movement would drive a stock quantity below zero.
    #[error("insufficient stock: {0}")]
    InsufficientStock(String),

    /// Stale version / lost update detected; safe to retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A structural invariant was violated (e.g. tenant mismatch).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidStateTransition(msg.into())
    }

    pub fn insufficient_stock(msg: impl Into<String>) -> Self {
        Self::InsufficientStock(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
