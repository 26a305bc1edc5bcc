//! The single write path into the inventory ledger.
//!
//! Every stock change, whatever produced it (manual adjustment, transfer leg,
//! purchase receipt), goes through [`InventoryActivityRecorder::record`]. One
//! call performs, inside the caller's unit of work:
//!
//! ```text
//! MovementRequest
//!   ↓
//! 1. validate (sign, direction, type)
//!   ↓
//! 2. lock the part (serializes movements of that part)
//!   ↓
//! 3. check the location is active
//!   ↓
//! 4. load or create the stock row, plan + apply the change
//!   ↓
//! 5. write the stock row (compare-and-swap on version)
//!   ↓
//! 6. append the audit entry
//! ```
//!
//! Nothing is visible until the caller commits; any error leaves the unit of
//! work to be dropped, which discards both the stock write and the audit entry.

use tracing::{debug, instrument};

use partledger_core::ExpectedVersion;
use partledger_inventory::{MovementRequest, PartStock, PartTransaction};

use crate::error::{ServiceError, ServiceResult};
use crate::store::LedgerTx;

/// Stock row and audit entry produced by one movement.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMovement {
    pub stock: PartStock,
    pub transaction: PartTransaction,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InventoryActivityRecorder;

impl InventoryActivityRecorder {
    pub fn new() -> Self {
        Self
    }

    #[instrument(
        skip_all,
        fields(
            tenant_id = %request.tenant_id,
            part_id = %request.part_id,
            location_id = %request.location_id,
            kind = %request.kind,
            change = request.quantity_change,
        ),
        err
    )]
    pub async fn record(
        &self,
        tx: &mut dyn LedgerTx,
        request: MovementRequest,
    ) -> ServiceResult<RecordedMovement> {
        request.validate()?;

        tx.lock_part(request.tenant_id, request.part_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("part {}", request.part_id)))?;
        tx.get_location(request.tenant_id, request.location_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("location {}", request.location_id)))?;

        let key = request.stock_key();
        let mut stock = tx
            .get_stock(key)
            .await?
            .unwrap_or_else(|| PartStock::empty(key));
        let expected = ExpectedVersion::from_loaded(stock.version());

        let movement = stock.plan(request.quantity_change)?;
        stock.apply(&movement, request.occurred_at)?;
        tx.put_stock(&stock, expected).await?;

        let transaction = request.into_transaction(&movement);
        tx.append_transaction(&transaction).await?;

        debug!(
            transaction_id = %transaction.id,
            quantity_before = movement.quantity_before,
            quantity_after = movement.quantity_after,
            "movement recorded"
        );

        Ok(RecordedMovement { stock, transaction })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partledger_core::{TenantId, UserId};
    use partledger_inventory::{Direction, Part, PartLocation, TransactionType};
    use rust_decimal::Decimal;

    use crate::store::{InMemoryLedgerStore, LedgerStore};

    fn seeded() -> (InMemoryLedgerStore, TenantId, Part, PartLocation) {
        let store = InMemoryLedgerStore::new();
        let tenant = TenantId::new();
        let part = Part::new(tenant, "P-100", "Bolt", "pcs", Decimal::new(5, 0));
        let location = PartLocation::new(tenant, "Main");
        store.insert_part(part.clone()).unwrap();
        store.insert_location(location.clone()).unwrap();
        (store, tenant, part, location)
    }

    #[tokio::test]
    async fn records_stock_and_audit_entry_together() {
        let (store, tenant, part, location) = seeded();
        let user = UserId::new();
        let mut tx = store.begin().await.unwrap();

        let recorded = InventoryActivityRecorder::new()
            .record(
                tx.as_mut(),
                MovementRequest::new(tenant, part.id, location.id, TransactionType::InitialStock, 12, user),
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(recorded.stock.quantity(), 12);
        assert_eq!(recorded.transaction.quantity_before, 0);
        assert_eq!(recorded.transaction.quantity_after, 12);
        assert_eq!(recorded.transaction.direction, Direction::In);

        let key = recorded.stock.key();
        assert_eq!(store.get_stock(key).await.unwrap().unwrap().quantity(), 12);
    }

    #[tokio::test]
    async fn rejects_outflow_beyond_stock() {
        let (store, tenant, part, location) = seeded();
        let mut tx = store.begin().await.unwrap();

        let err = InventoryActivityRecorder::new()
            .record(
                tx.as_mut(),
                MovementRequest::new(tenant, part.id, location.id, TransactionType::Consumption, -1, UserId::new()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::InsufficientStock(_)));
    }

    #[tokio::test]
    async fn unknown_part_or_location_is_not_found() {
        let (store, tenant, part, location) = seeded();
        let mut tx = store.begin().await.unwrap();
        let recorder = InventoryActivityRecorder::new();

        let missing_part = recorder
            .record(
                tx.as_mut(),
                MovementRequest::new(
                    tenant,
                    partledger_inventory::PartId::new(),
                    location.id,
                    TransactionType::InitialStock,
                    1,
                    UserId::new(),
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(missing_part, ServiceError::NotFound(_)));

        let missing_location = recorder
            .record(
                tx.as_mut(),
                MovementRequest::new(
                    tenant,
                    part.id,
                    partledger_inventory::LocationId::new(),
                    TransactionType::InitialStock,
                    1,
                    UserId::new(),
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(missing_location, ServiceError::NotFound(_)));
    }
}
