use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use partledger_core::{DomainError, DomainResult, Entity, TenantId};

use crate::part::{LocationId, PartId};

/// Composite key of a stock row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub location_id: LocationId,
}

impl StockKey {
    pub fn new(tenant_id: TenantId, part_id: PartId, location_id: LocationId) -> Self {
        Self {
            tenant_id,
            part_id,
            location_id,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "part {} at location {}", self.part_id, self.location_id)
    }
}

/// Quantity arithmetic for one movement, computed before anything is written.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub quantity_before: i64,
    pub quantity_change: i64,
    pub quantity_after: i64,
}

/// Current quantity of one part at one location.
///
/// Rows are created lazily (quantity 0, version 0) on the first movement into
/// a new part/location pair. `version` is bumped on every persisted change and
/// doubles as the compare-and-swap token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartStock {
    key: StockKey,
    quantity: i64,
    threshold: i64,
    version: u64,
    updated_at: Option<DateTime<Utc>>,
}

impl PartStock {
    /// A not-yet-persisted row.
    pub fn empty(key: StockKey) -> Self {
        Self {
            key,
            quantity: 0,
            threshold: 0,
            version: 0,
            updated_at: None,
        }
    }

    /// Rebuild a row from storage.
    pub fn restore(
        key: StockKey,
        quantity: i64,
        threshold: i64,
        version: u64,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            key,
            quantity,
            threshold,
            version,
            updated_at,
        }
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }

    /// At or below the reorder hint. A zero threshold disables the hint.
    pub fn is_below_threshold(&self) -> bool {
        self.threshold > 0 && self.quantity <= self.threshold
    }

    /// Compute the effect of `change` without mutating the row.
    pub fn plan(&self, change: i64) -> DomainResult<StockMovement> {
        if change == 0 {
            return Err(DomainError::validation("quantity change cannot be zero"));
        }

        let after = self
            .quantity
            .checked_add(change)
            .ok_or_else(|| DomainError::validation("quantity change overflows stock quantity"))?;

        if after < 0 {
            return Err(DomainError::insufficient_stock(format!(
                "{}: available {}, requested {}",
                self.key,
                self.quantity,
                change.unsigned_abs()
            )));
        }

        Ok(StockMovement {
            quantity_before: self.quantity,
            quantity_change: change,
            quantity_after: after,
        })
    }

    /// Apply a movement previously produced by [`PartStock::plan`] on this row.
    pub fn apply(&mut self, movement: &StockMovement, at: DateTime<Utc>) -> DomainResult<()> {
        if movement.quantity_before != self.quantity {
            return Err(DomainError::conflict(format!(
                "{}: movement planned against quantity {}, row holds {}",
                self.key, movement.quantity_before, self.quantity
            )));
        }
        self.quantity = movement.quantity_after;
        self.updated_at = Some(at);
        self.version += 1;
        Ok(())
    }

    pub fn set_threshold(&mut self, threshold: i64, at: DateTime<Utc>) -> DomainResult<()> {
        if threshold < 0 {
            return Err(DomainError::validation("threshold cannot be negative"));
        }
        self.threshold = threshold;
        self.updated_at = Some(at);
        self.version += 1;
        Ok(())
    }
}

impl Entity for PartStock {
    type Id = StockKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }
}
