use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use partledger_core::{DomainError, DomainResult, Entity, TenantId, typed_id};

typed_id!(
    /// Maintenance part identifier (tenant-scoped).
    PartId
);

typed_id!(
    /// Stock location identifier (tenant-scoped).
    LocationId
);

/// Catalog part as seen by the ledger.
///
/// Everything except `average_unit_cost` is owned by the part catalog; the
/// ledger only ever writes the average, and only on purchase receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub id: PartId,
    pub tenant_id: TenantId,
    pub part_number: String,
    pub name: String,
    pub measurement_unit: String,
    /// Catalog list price.
    pub unit_cost: Decimal,
    /// Tenant-wide weighted-average cost; `None` until the first receipt.
    pub average_unit_cost: Option<Decimal>,
}

impl Part {
    pub fn new(
        tenant_id: TenantId,
        part_number: impl Into<String>,
        name: impl Into<String>,
        measurement_unit: impl Into<String>,
        unit_cost: Decimal,
    ) -> Self {
        Self {
            id: PartId::new(),
            tenant_id,
            part_number: part_number.into(),
            name: name.into(),
            measurement_unit: measurement_unit.into(),
            unit_cost,
            average_unit_cost: None,
        }
    }

    /// Average used as the starting point of the next blend (0 if unset).
    pub fn current_average(&self) -> Decimal {
        self.average_unit_cost.unwrap_or(Decimal::ZERO)
    }

    pub fn ensure_tenant(&self, tenant_id: TenantId) -> DomainResult<()> {
        if self.tenant_id != tenant_id {
            return Err(DomainError::not_found(format!("part {} not found", self.id)));
        }
        Ok(())
    }
}

impl Entity for Part {
    type Id = PartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Physical place where parts are stocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartLocation {
    pub id: LocationId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Soft-delete marker; deleted locations accept no movements.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PartLocation {
    pub fn new(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id: LocationId::new(),
            tenant_id,
            name: name.into(),
            deleted_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

impl Entity for PartLocation {
    type Id = LocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn unset_average_counts_as_zero() {
        let part = Part::new(TenantId::new(), "BRK-01", "Brake pad", "pcs", dec("12.50"));
        assert_eq!(part.current_average(), Decimal::ZERO);
    }

    #[test]
    fn foreign_tenant_sees_part_as_missing() {
        let part = Part::new(TenantId::new(), "BRK-01", "Brake pad", "pcs", dec("12.50"));
        let err = part.ensure_tenant(TenantId::new()).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }
}
