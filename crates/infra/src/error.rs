//! Service-level error taxonomy and the bounded retry policy.

use std::future::Future;

use thiserror::Error;
use tracing::warn;

use partledger_core::DomainError;

use crate::store::StoreError;

/// Failure of a ledger or purchasing operation.
///
/// Every variant aborts the whole unit of work; callers never observe a
/// partial ledger/audit pair.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("insufficient stock: {0}")]
    InsufficientStock(String),

    /// Lost update or race detected; safe to retry.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn not_found(what: impl core::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{what} not found"))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::ConcurrencyConflict(_))
    }

    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation_error",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::InvalidStateTransition(_) => "invalid_state_transition",
            ServiceError::InsufficientStock(_) => "insufficient_stock",
            ServiceError::ConcurrencyConflict(_) => "concurrency_conflict",
            ServiceError::Storage(_) => "storage_error",
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                ServiceError::Validation(msg)
            }
            DomainError::NotFound(msg) => ServiceError::NotFound(msg),
            DomainError::InvalidStateTransition(msg) => ServiceError::InvalidStateTransition(msg),
            DomainError::InsufficientStock(msg) => ServiceError::InsufficientStock(msg),
            DomainError::Conflict(msg) => ServiceError::ConcurrencyConflict(msg),
            DomainError::InvariantViolation(msg) => ServiceError::Storage(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => ServiceError::ConcurrencyConflict(msg),
            StoreError::NotFound(msg) => ServiceError::not_found(msg),
            StoreError::TenantIsolation(msg) | StoreError::Backend(msg) => {
                ServiceError::Storage(msg)
            }
        }
    }
}

/// Bounded retry on [`ServiceError::ConcurrencyConflict`].
///
/// `attempt` must build a fresh unit of work each time. Other errors are
/// returned immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> ServiceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let mut tries = 0;
        loop {
            tries += 1;
            match attempt().await {
                Err(err) if err.is_retryable() && tries < self.max_attempts => {
                    warn!(operation, attempt = tries, error = %err, "retrying after conflict");
                    tokio::task::yield_now().await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_conflicts_up_to_the_bound() {
        let calls = &AtomicU32::new(0);
        let result: ServiceResult<()> = RetryPolicy::new(3)
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::ConcurrencyConflict("stale".into()))
            })
            .await;
        assert!(matches!(result, Err(ServiceError::ConcurrencyConflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: ServiceResult<()> = RetryPolicy::new(5)
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::InsufficientStock("none left".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_a_conflict() {
        let calls = &AtomicU32::new(0);
        let result = RetryPolicy::new(3)
            .run("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ServiceError::ConcurrencyConflict("stale".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn domain_errors_map_to_service_kinds() {
        assert_eq!(
            ServiceError::from(DomainError::insufficient_stock("x")).kind(),
            "insufficient_stock"
        );
        assert!(ServiceError::from(StoreError::Conflict("x".into())).is_retryable());
    }
}
