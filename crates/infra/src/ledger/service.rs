//! Inventory ledger operations as exposed to callers.
//!
//! Each mutating operation opens one unit of work, runs under the
//! [`RetryPolicy`], and commits only if every step succeeded. Reads go
//! straight to committed state.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use partledger_core::{ExpectedVersion, TenantId};
use partledger_inventory::{
    LocationId, MovementRequest, PartId, PartStock, PartTransaction, StockKey, TransactionType,
    TransferRequest,
};

use super::recorder::{InventoryActivityRecorder, RecordedMovement};
use super::transfer::{StockTransferCoordinator, TransferOutcome};
use crate::error::{RetryPolicy, ServiceError, ServiceResult};
use crate::registry::{ReferencedEntity, UsageRegistry, UsageSummary};
use crate::store::{LedgerStore, Page, Pagination, StockFilter, TransactionFilter};

/// Movement types a caller may post directly. Receipts and transfer legs are
/// only produced by their own workflows.
const DIRECT_MOVEMENT_TYPES: &[TransactionType] = &[
    TransactionType::ManualAdjustment,
    TransactionType::InitialStock,
    TransactionType::Consumption,
];

#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
    recorder: InventoryActivityRecorder,
    transfers: StockTransferCoordinator,
    registry: UsageRegistry,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, retry: RetryPolicy) -> Self {
        let recorder = InventoryActivityRecorder::new();
        Self {
            store,
            retry,
            recorder,
            transfers: StockTransferCoordinator::new(recorder),
            registry: UsageRegistry::standard(),
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Post a manual adjustment, initial stock or consumption movement.
    pub async fn adjust(&self, request: MovementRequest) -> ServiceResult<RecordedMovement> {
        if !DIRECT_MOVEMENT_TYPES.contains(&request.kind) {
            return Err(ServiceError::Validation(format!(
                "transaction type '{}' cannot be posted directly",
                request.kind
            )));
        }
        request.validate()?;

        let request = &request;
        let recorded = self
            .retry
            .run("inventory.adjust", move || self.try_adjust(request.clone()))
            .await?;

        info!(
            tenant_id = %recorded.transaction.tenant_id,
            part_id = %recorded.transaction.part_id,
            location_id = %recorded.transaction.location_id,
            kind = %recorded.transaction.kind,
            quantity_after = recorded.transaction.quantity_after,
            "stock adjusted"
        );
        Ok(recorded)
    }

    async fn try_adjust(&self, request: MovementRequest) -> ServiceResult<RecordedMovement> {
        let mut tx = self.store.begin().await?;
        let recorded = self.recorder.record(tx.as_mut(), request).await?;
        tx.commit().await?;
        Ok(recorded)
    }

    pub async fn transfer(&self, request: TransferRequest) -> ServiceResult<TransferOutcome> {
        request.validate()?;

        let request = &request;
        let outcome = self
            .retry
            .run("inventory.transfer", move || self.try_transfer(request))
            .await?;

        info!(
            tenant_id = %request.tenant_id,
            part_id = %request.part_id,
            from = %request.from_location,
            to = %request.to_location,
            quantity = request.quantity,
            transfer_id = %outcome.transfer_id,
            "stock transferred"
        );
        Ok(outcome)
    }

    async fn try_transfer(&self, request: &TransferRequest) -> ServiceResult<TransferOutcome> {
        let mut tx = self.store.begin().await?;
        let outcome = self.transfers.transfer(tx.as_mut(), request).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Set the low-stock threshold of a part/location pair, creating the
    /// (empty) stock row if needed.
    pub async fn set_threshold(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        location_id: LocationId,
        threshold: i64,
    ) -> ServiceResult<PartStock> {
        if threshold < 0 {
            return Err(ServiceError::Validation(
                "threshold cannot be negative".to_string(),
            ));
        }
        let key = StockKey::new(tenant_id, part_id, location_id);
        self.retry
            .run("inventory.set_threshold", move || {
                self.try_set_threshold(key, threshold)
            })
            .await
    }

    async fn try_set_threshold(&self, key: StockKey, threshold: i64) -> ServiceResult<PartStock> {
        let mut tx = self.store.begin().await?;
        tx.get_part(key.tenant_id, key.part_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("part {}", key.part_id)))?;
        tx.get_location(key.tenant_id, key.location_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("location {}", key.location_id)))?;

        let mut stock = tx
            .get_stock(key)
            .await?
            .unwrap_or_else(|| PartStock::empty(key));
        let expected = ExpectedVersion::from_loaded(stock.version());
        stock.set_threshold(threshold, Utc::now())?;
        tx.put_stock(&stock, expected).await?;
        tx.commit().await?;
        Ok(stock)
    }

    /// Soft-delete a location. Its stock rows go with it; audit entries stay.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, location_id = %location_id), err)]
    pub async fn remove_location(
        &self,
        tenant_id: TenantId,
        location_id: LocationId,
    ) -> ServiceResult<u64> {
        let removed = self
            .retry
            .run("inventory.remove_location", move || async move {
                let mut tx = self.store.begin().await?;
                let removed = tx.remove_location(tenant_id, location_id, Utc::now()).await?;
                tx.commit().await?;
                Ok::<_, ServiceError>(removed)
            })
            .await?;

        info!(removed_stock_rows = removed, "location removed");
        Ok(removed)
    }

    /// Current stock for a pair. A known part at an active location with no
    /// row yet reads as zero.
    pub async fn stock(&self, key: StockKey) -> ServiceResult<PartStock> {
        self.store
            .get_part(key.tenant_id, key.part_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("part {}", key.part_id)))?;
        self.store
            .get_location(key.tenant_id, key.location_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("location {}", key.location_id)))?;
        Ok(self
            .store
            .get_stock(key)
            .await?
            .unwrap_or_else(|| PartStock::empty(key)))
    }

    pub async fn list_stock(
        &self,
        tenant_id: TenantId,
        filter: StockFilter,
    ) -> ServiceResult<Vec<PartStock>> {
        Ok(self.store.list_stock(tenant_id, filter).await?)
    }

    /// Audit entries, newest first.
    pub async fn transactions(
        &self,
        tenant_id: TenantId,
        filter: TransactionFilter,
        pagination: Pagination,
    ) -> ServiceResult<Page<PartTransaction>> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(ServiceError::Validation(
                    "'from' must not be after 'to'".to_string(),
                ));
            }
        }
        Ok(self
            .store
            .query_transactions(tenant_id, filter, pagination)
            .await?)
    }

    pub async fn usage(
        &self,
        tenant_id: TenantId,
        entity: ReferencedEntity,
        id: Uuid,
    ) -> ServiceResult<UsageSummary> {
        Ok(self
            .registry
            .count_usages(self.store.as_ref(), tenant_id, entity, id)
            .await?)
    }
}
