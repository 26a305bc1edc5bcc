//! Stock transfers between two locations of one tenant.
//!
//! A transfer is two movements sharing one source document: a `transfer-out`
//! leg at the origin and a `transfer-in` leg at the destination. Both legs are
//! recorded in the caller's unit of work, so either both become visible or
//! neither does.

use tracing::instrument;
use uuid::Uuid;

use partledger_inventory::TransferRequest;

use super::recorder::{InventoryActivityRecorder, RecordedMovement};
use crate::error::{ServiceError, ServiceResult};
use crate::store::LedgerTx;

/// Both legs of a completed transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub transfer_id: Uuid,
    pub outbound: RecordedMovement,
    pub inbound: RecordedMovement,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StockTransferCoordinator {
    recorder: InventoryActivityRecorder,
}

impl StockTransferCoordinator {
    pub fn new(recorder: InventoryActivityRecorder) -> Self {
        Self { recorder }
    }

    #[instrument(
        skip_all,
        fields(
            tenant_id = %request.tenant_id,
            part_id = %request.part_id,
            from = %request.from_location,
            to = %request.to_location,
            quantity = request.quantity,
        ),
        err
    )]
    pub async fn transfer(
        &self,
        tx: &mut dyn LedgerTx,
        request: &TransferRequest,
    ) -> ServiceResult<TransferOutcome> {
        let plan = request.plan()?;

        // Both ends must exist before either leg writes.
        for location in [request.from_location, request.to_location] {
            tx.get_location(request.tenant_id, location)
                .await?
                .ok_or_else(|| ServiceError::not_found(format!("location {location}")))?;
        }

        let outbound = self.recorder.record(tx, plan.out_leg).await?;
        let inbound = self.recorder.record(tx, plan.in_leg).await?;

        Ok(TransferOutcome {
            transfer_id: plan.transfer_id,
            outbound,
            inbound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use partledger_core::{TenantId, UserId};
    use partledger_inventory::{
        LocationId, MovementRequest, Part, PartLocation, SourceDocumentKind, StockKey,
        TransactionType,
    };
    use rust_decimal::Decimal;

    use crate::store::{InMemoryLedgerStore, LedgerStore};

    struct Fixture {
        store: InMemoryLedgerStore,
        tenant: TenantId,
        part: Part,
        from: PartLocation,
        to: PartLocation,
    }

    async fn fixture(on_hand: i64) -> Fixture {
        let store = InMemoryLedgerStore::new();
        let tenant = TenantId::new();
        let part = Part::new(tenant, "P-7", "Hose", "m", Decimal::new(12, 0));
        let from = PartLocation::new(tenant, "Warehouse");
        let to = PartLocation::new(tenant, "Van 3");
        store.insert_part(part.clone()).unwrap();
        store.insert_location(from.clone()).unwrap();
        store.insert_location(to.clone()).unwrap();

        let mut tx = store.begin().await.unwrap();
        InventoryActivityRecorder::new()
            .record(
                tx.as_mut(),
                MovementRequest::new(tenant, part.id, from.id, TransactionType::InitialStock, on_hand, UserId::new()),
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        Fixture { store, tenant, part, from, to }
    }

    fn request(f: &Fixture, to: LocationId, quantity: i64) -> TransferRequest {
        TransferRequest {
            tenant_id: f.tenant,
            part_id: f.part.id,
            from_location: f.from.id,
            to_location: to,
            quantity,
            reason: Some("restock van".to_string()),
            performed_by: UserId::new(),
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn moves_stock_and_links_both_legs() {
        let f = fixture(10).await;
        let mut tx = f.store.begin().await.unwrap();
        let outcome = StockTransferCoordinator::default()
            .transfer(tx.as_mut(), &request(&f, f.to.id, 4))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(outcome.outbound.stock.quantity(), 6);
        assert_eq!(outcome.inbound.stock.quantity(), 4);
        assert_eq!(outcome.outbound.transaction.kind, TransactionType::TransferOut);
        assert_eq!(outcome.inbound.transaction.kind, TransactionType::TransferIn);

        let source = outcome.outbound.transaction.source.unwrap();
        assert_eq!(source.kind, SourceDocumentKind::StockTransfer);
        assert_eq!(source.id, outcome.transfer_id);
        assert_eq!(outcome.inbound.transaction.source, Some(source));
    }

    #[tokio::test]
    async fn missing_destination_aborts_before_any_write() {
        let f = fixture(10).await;
        let mut tx = f.store.begin().await.unwrap();
        let err = StockTransferCoordinator::default()
            .transfer(tx.as_mut(), &request(&f, LocationId::new(), 4))
            .await
            .unwrap_err();
        drop(tx);

        assert!(matches!(err, ServiceError::NotFound(_)));
        let origin = f
            .store
            .get_stock(StockKey::new(f.tenant, f.part.id, f.from.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(origin.quantity(), 10);
    }

    #[tokio::test]
    async fn same_location_is_rejected() {
        let f = fixture(10).await;
        let mut tx = f.store.begin().await.unwrap();
        let err = StockTransferCoordinator::default()
            .transfer(tx.as_mut(), &request(&f, f.from.id, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
