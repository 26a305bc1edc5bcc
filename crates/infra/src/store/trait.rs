use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use partledger_core::{ExpectedVersion, TenantId, UserId};
use partledger_inventory::{LocationId, Part, PartId, PartLocation, PartStock, PartTransaction, StockKey};
use partledger_purchasing::{PurchaseOrder, PurchaseOrderId, Vendor, VendorId};

use super::query::{OrderFilter, Page, Pagination, StockFilter, TransactionFilter};
use crate::registry::UsageSource;

/// Storage error.
///
/// Infrastructure failures, as opposed to the domain's business errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Stale version, lost update or concurrent insert; safe to retry.
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One recorded purchase-order transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderHistoryEntry {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    /// Order version right after this event; strictly increasing per order.
    pub sequence: u64,
    pub event_type: String,
    pub event_version: u32,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

/// Unit of work over the ledger and purchase orders.
///
/// Writes become visible only on [`LedgerTx::commit`]. Dropping the unit of
/// work without committing discards everything it wrote.
///
/// Implementations must:
/// - scope every read and write to the given tenant
/// - serialize concurrent movements of one part behind [`LedgerTx::lock_part`]
/// - reject `put_stock` / `save_order` whose expectation does not match the
///   stored version with [`StoreError::Conflict`]
#[async_trait::async_trait]
pub trait LedgerTx: Send {
    /// Read a part without locking it.
    async fn get_part(&mut self, tenant_id: TenantId, part_id: PartId) -> StoreResult<Option<Part>>;

    /// Load a part and take its per-part lock for the rest of the unit of work.
    async fn lock_part(&mut self, tenant_id: TenantId, part_id: PartId) -> StoreResult<Option<Part>>;

    async fn set_average_cost(
        &mut self,
        tenant_id: TenantId,
        part_id: PartId,
        average: Decimal,
    ) -> StoreResult<()>;

    /// Active (not soft-deleted) location.
    async fn get_location(
        &mut self,
        tenant_id: TenantId,
        location_id: LocationId,
    ) -> StoreResult<Option<PartLocation>>;

    /// Active (not soft-deleted) vendor.
    async fn get_vendor(&mut self, tenant_id: TenantId, vendor_id: VendorId) -> StoreResult<Option<Vendor>>;

    /// Soft-delete a location and remove its stock rows. Returns the number of
    /// stock rows removed.
    async fn remove_location(
        &mut self,
        tenant_id: TenantId,
        location_id: LocationId,
        at: DateTime<Utc>,
    ) -> StoreResult<u64>;

    async fn get_stock(&mut self, key: StockKey) -> StoreResult<Option<PartStock>>;

    /// Compare-and-swap write of a stock row.
    async fn put_stock(&mut self, stock: &PartStock, expected: ExpectedVersion) -> StoreResult<()>;

    /// Quantity of a part summed over every location of the tenant.
    async fn total_quantity(&mut self, tenant_id: TenantId, part_id: PartId) -> StoreResult<i64>;

    /// Append an audit row. There is no update or delete counterpart.
    async fn append_transaction(&mut self, transaction: &PartTransaction) -> StoreResult<()>;

    async fn load_order(
        &mut self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>>;

    /// Compare-and-swap write of an order.
    async fn save_order(
        &mut self,
        tenant_id: TenantId,
        order: &PurchaseOrder,
        expected: ExpectedVersion,
    ) -> StoreResult<()>;

    async fn delete_order(
        &mut self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        expected: ExpectedVersion,
    ) -> StoreResult<()>;

    async fn append_order_history(&mut self, entries: &[OrderHistoryEntry]) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Tenant-scoped ledger storage.
///
/// Mutations go through [`LedgerStore::begin`]; the remaining methods are
/// committed-state reads for listings and lookups.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>>;

    async fn get_part(&self, tenant_id: TenantId, part_id: PartId) -> StoreResult<Option<Part>>;

    /// Active locations only; soft-deleted ones read as `None`.
    async fn get_location(
        &self,
        tenant_id: TenantId,
        location_id: LocationId,
    ) -> StoreResult<Option<PartLocation>>;

    async fn get_stock(&self, key: StockKey) -> StoreResult<Option<PartStock>>;

    async fn list_stock(&self, tenant_id: TenantId, filter: StockFilter) -> StoreResult<Vec<PartStock>>;

    /// Audit rows ordered by `occurred_at` descending.
    async fn query_transactions(
        &self,
        tenant_id: TenantId,
        filter: TransactionFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<PartTransaction>>;

    async fn get_order(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>>;

    /// Orders ordered by creation time descending.
    async fn list_orders(
        &self,
        tenant_id: TenantId,
        filter: OrderFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<PurchaseOrder>>;

    /// History entries ordered by sequence.
    async fn order_history(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> StoreResult<Vec<OrderHistoryEntry>>;

    /// Rows of `source` whose reference field equals `id`.
    async fn count_by_field(&self, tenant_id: TenantId, source: UsageSource, id: Uuid) -> StoreResult<u64>;
}
