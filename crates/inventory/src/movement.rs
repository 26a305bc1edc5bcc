use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use partledger_core::{DomainError, DomainResult, TenantId, UserId};

use crate::part::{LocationId, PartId};
use crate::stock::{StockKey, StockMovement};
use crate::transaction::{
    Direction, PartTransaction, SourceDocument, TransactionId, TransactionType,
};

/// Input to a single ledger movement.
///
/// Built by callers (adjustments, transfer legs, purchase receipts) and handed
/// to the activity recorder, which is the only component that applies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub location_id: LocationId,
    pub kind: TransactionType,
    pub direction: Direction,
    pub quantity_change: i64,
    pub performed_by: UserId,
    pub source: Option<SourceDocument>,
    pub reason: Option<String>,
    pub unit_cost: Option<Decimal>,
    pub metadata: JsonValue,
    pub occurred_at: DateTime<Utc>,
}

impl MovementRequest {
    /// Direction is derived from the sign of `quantity_change`.
    pub fn new(
        tenant_id: TenantId,
        part_id: PartId,
        location_id: LocationId,
        kind: TransactionType,
        quantity_change: i64,
        performed_by: UserId,
    ) -> Self {
        Self {
            tenant_id,
            part_id,
            location_id,
            kind,
            direction: Direction::of_change(quantity_change),
            quantity_change,
            performed_by,
            source: None,
            reason: None,
            unit_cost: None,
            metadata: JsonValue::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: SourceDocument) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_unit_cost(mut self, unit_cost: Decimal) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn stock_key(&self) -> StockKey {
        StockKey::new(self.tenant_id, self.part_id, self.location_id)
    }

    /// Input checks that need no stored state.
    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity_change == 0 {
            return Err(DomainError::validation("quantity change cannot be zero"));
        }

        if self.direction != Direction::of_change(self.quantity_change) {
            return Err(DomainError::validation(format!(
                "direction {} does not match quantity change {}",
                self.direction.as_str(),
                self.quantity_change
            )));
        }

        if let Some(fixed) = self.kind.fixed_direction() {
            if fixed != self.direction {
                return Err(DomainError::validation(format!(
                    "{} movements must be {}",
                    self.kind,
                    fixed.as_str()
                )));
            }
        }

        if self.unit_cost.is_some_and(|c| c.is_sign_negative()) {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }

        if self.reason.as_deref().is_some_and(|r| r.trim().is_empty()) {
            return Err(DomainError::validation("reason cannot be blank"));
        }

        Ok(())
    }

    /// Build the audit row for a movement already planned against the stock row.
    pub fn into_transaction(self, movement: &StockMovement) -> PartTransaction {
        PartTransaction {
            id: TransactionId::new(),
            tenant_id: self.tenant_id,
            part_id: self.part_id,
            location_id: self.location_id,
            kind: self.kind,
            direction: self.direction,
            quantity_before: movement.quantity_before,
            quantity_change: movement.quantity_change,
            quantity_after: movement.quantity_after,
            unit_cost: self.unit_cost,
            performed_by: self.performed_by,
            source: self.source,
            reason: self.reason,
            metadata: self.metadata,
            occurred_at: self.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::PartStock;

    fn request(kind: TransactionType, change: i64) -> MovementRequest {
        MovementRequest::new(
            TenantId::new(),
            PartId::new(),
            LocationId::new(),
            kind,
            change,
            UserId::new(),
        )
    }

    #[test]
    fn adjustments_move_either_way() {
        assert!(request(TransactionType::ManualAdjustment, 5).validate().is_ok());
        assert!(request(TransactionType::ManualAdjustment, -5).validate().is_ok());
    }

    #[test]
    fn typed_movements_enforce_direction() {
        assert!(request(TransactionType::PurchaseReceipt, 5).validate().is_ok());
        assert!(matches!(
            request(TransactionType::PurchaseReceipt, -5).validate(),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            request(TransactionType::TransferOut, 5).validate(),
            Err(DomainError::Validation(_))
        ));
        assert!(request(TransactionType::Consumption, -1).validate().is_ok());
    }

    #[test]
    fn tampered_direction_is_rejected() {
        let mut req = request(TransactionType::ManualAdjustment, 5);
        req.direction = Direction::Out;
        assert!(req.validate().is_err());
    }

    #[test]
    fn negative_unit_cost_is_rejected() {
        let req = request(TransactionType::PurchaseReceipt, 5).with_unit_cost(Decimal::NEGATIVE_ONE);
        assert!(req.validate().is_err());
    }

    #[test]
    fn transaction_copies_planned_quantities() {
        let req = request(TransactionType::InitialStock, 7).with_reason("opening count");
        let stock = PartStock::empty(req.stock_key());
        let mv = stock.plan(req.quantity_change).unwrap();

        let tx = req.clone().into_transaction(&mv);
        assert_eq!(tx.quantity_before, 0);
        assert_eq!(tx.quantity_change, 7);
        assert_eq!(tx.quantity_after, 7);
        assert_eq!(tx.direction, Direction::In);
        assert_eq!(tx.reason.as_deref(), Some("opening count"));
        assert_eq!(tx.stock_key(), req.stock_key());
    }
}
