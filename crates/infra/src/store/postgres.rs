//! Postgres-backed ledger store.
//!
//! One unit of work is one SQL transaction. Schema lives in
//! `migrations/0001_inventory_ledger.sql`.
//!
//! ## Concurrency
//!
//! - `lock_part` takes `SELECT ... FOR UPDATE` on the part row, so movements of
//!   one part (and the tenant-wide total read by cost averaging) are serialized.
//! - Stock rows and orders are written with compare-and-swap on `version`;
//!   zero affected rows means another writer won and maps to `Conflict`.
//! - Location reads inside a unit of work take `FOR SHARE` so a concurrent
//!   soft-delete waits for in-flight movements.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (serialization failure / deadlock) | `40001` / `40P01` | `Conflict` |
//! | Database (other) | any other | `Backend` |
//! | Other | N/A | `Backend` |

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use partledger_core::{AggregateRoot, ExpectedVersion, TenantId, UserId};
use partledger_inventory::{
    Direction, LocationId, Part, PartId, PartLocation, PartStock, PartTransaction, SourceDocument,
    SourceDocumentKind, StockKey, TransactionId, TransactionType,
};
use partledger_purchasing::{PurchaseOrder, PurchaseOrderId, Vendor, VendorId};

use super::query::{OrderFilter, Page, Pagination, StockFilter, TransactionFilter};
use super::r#trait::{LedgerStore, LedgerTx, OrderHistoryEntry, StoreError, StoreResult};
use crate::registry::UsageSource;

/// Postgres-backed ledger store.
///
/// Every query includes `tenant_id` in the WHERE clause.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

const SCHEMA: &str = include_str!("../../../../migrations/0001_inventory_ledger.sql");

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the ledger tables if missing. The script is idempotent.
    pub async fn apply_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("apply_schema", e))?;
        Ok(())
    }
}

/// One SQL transaction. Dropping it rolls back.
pub struct PostgresLedgerTx {
    tx: Transaction<'static, Postgres>,
}

const PART_COLUMNS: &str =
    "id, tenant_id, part_number, name, measurement_unit, unit_cost, average_unit_cost";
const STOCK_COLUMNS: &str = "tenant_id, part_id, location_id, quantity, threshold, version, updated_at";
const TRANSACTION_COLUMNS: &str = "id, tenant_id, part_id, location_id, type, direction, \
    quantity_before, quantity_change, quantity_after, unit_cost, performed_by, \
    source_type, source_id, source_line_id, reason, metadata, occurred_at";

#[async_trait::async_trait]
impl LedgerTx for PostgresLedgerTx {
    async fn get_part(&mut self, tenant_id: TenantId, part_id: PartId) -> StoreResult<Option<Part>> {
        let row = sqlx::query(&format!(
            "SELECT {PART_COLUMNS} FROM parts WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(part_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_part", e))?;

        row.as_ref().map(part_from_row).transpose()
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id, part_id = %part_id), err)]
    async fn lock_part(&mut self, tenant_id: TenantId, part_id: PartId) -> StoreResult<Option<Part>> {
        let row = sqlx::query(&format!(
            "SELECT {PART_COLUMNS} FROM parts WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
        ))
        .bind(tenant_id.as_uuid())
        .bind(part_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_part", e))?;

        row.as_ref().map(part_from_row).transpose()
    }

    async fn set_average_cost(
        &mut self,
        tenant_id: TenantId,
        part_id: PartId,
        average: Decimal,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE parts
            SET average_unit_cost = $3, version = version + 1
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(part_id.as_uuid())
        .bind(average)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("set_average_cost", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("part {part_id}")));
        }
        Ok(())
    }

    async fn get_location(
        &mut self,
        tenant_id: TenantId,
        location_id: LocationId,
    ) -> StoreResult<Option<PartLocation>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, name, deleted_at
            FROM part_locations
            WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL
            FOR SHARE
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(location_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_location", e))?;

        row.as_ref().map(location_from_row).transpose()
    }

    async fn get_vendor(&mut self, tenant_id: TenantId, vendor_id: VendorId) -> StoreResult<Option<Vendor>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, name, contact_email, deleted_at
            FROM vendors
            WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(vendor_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_vendor", e))?;

        row.as_ref().map(vendor_from_row).transpose()
    }

    #[instrument(
        skip_all,
        fields(
            tenant_id = %tenant_id,
            location_id = %location_id,
            removed_stock_rows = tracing::field::Empty,
        ),
        err
    )]
    async fn remove_location(
        &mut self,
        tenant_id: TenantId,
        location_id: LocationId,
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE part_locations
            SET deleted_at = $3, version = version + 1
            WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(location_id.as_uuid())
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("remove_location", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("location {location_id}")));
        }

        let removed = sqlx::query("DELETE FROM part_stock WHERE tenant_id = $1 AND location_id = $2")
            .bind(tenant_id.as_uuid())
            .bind(location_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("remove_location_stock", e))?;

        Span::current().record("removed_stock_rows", removed.rows_affected());
        Ok(removed.rows_affected())
    }

    async fn get_stock(&mut self, key: StockKey) -> StoreResult<Option<PartStock>> {
        let row = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM part_stock \
             WHERE tenant_id = $1 AND part_id = $2 AND location_id = $3"
        ))
        .bind(key.tenant_id.as_uuid())
        .bind(key.part_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_stock", e))?;

        row.as_ref().map(stock_from_row).transpose()
    }

    #[instrument(
        skip_all,
        fields(
            tenant_id = %stock.key().tenant_id,
            part_id = %stock.key().part_id,
            location_id = %stock.key().location_id,
            expected = ?expected
        ),
        err
    )]
    async fn put_stock(&mut self, stock: &PartStock, expected: ExpectedVersion) -> StoreResult<()> {
        let key = stock.key();
        let result = match expected {
            ExpectedVersion::Absent | ExpectedVersion::Any => {
                let upsert = if expected == ExpectedVersion::Any {
                    "ON CONFLICT (tenant_id, part_id, location_id) DO UPDATE SET \
                     quantity = EXCLUDED.quantity, threshold = EXCLUDED.threshold, \
                     version = EXCLUDED.version, updated_at = EXCLUDED.updated_at"
                } else {
                    ""
                };
                sqlx::query(&format!(
                    "INSERT INTO part_stock ({STOCK_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) {upsert}"
                ))
                .bind(key.tenant_id.as_uuid())
                .bind(key.part_id.as_uuid())
                .bind(key.location_id.as_uuid())
                .bind(stock.quantity())
                .bind(stock.threshold())
                .bind(stock.version() as i64)
                .bind(stock.updated_at())
                .execute(&mut *self.tx)
                .await
            }
            ExpectedVersion::Exact(version) => {
                sqlx::query(
                    r#"
                    UPDATE part_stock
                    SET quantity = $4, threshold = $5, version = $6, updated_at = $7
                    WHERE tenant_id = $1 AND part_id = $2 AND location_id = $3 AND version = $8
                    "#,
                )
                .bind(key.tenant_id.as_uuid())
                .bind(key.part_id.as_uuid())
                .bind(key.location_id.as_uuid())
                .bind(stock.quantity())
                .bind(stock.threshold())
                .bind(stock.version() as i64)
                .bind(stock.updated_at())
                .bind(version as i64)
                .execute(&mut *self.tx)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("put_stock", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "stock for {key} is no longer at {expected:?}"
            )));
        }
        Ok(())
    }

    async fn total_quantity(&mut self, tenant_id: TenantId, part_id: PartId) -> StoreResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT AS total
            FROM part_stock
            WHERE tenant_id = $1 AND part_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(part_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("total_quantity", e))?;

        row.try_get("total").map_err(|e| decode_error("total", e))
    }

    async fn append_transaction(&mut self, transaction: &PartTransaction) -> StoreResult<()> {
        let t = transaction;
        sqlx::query(&format!(
            "INSERT INTO part_transactions ({TRANSACTION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        ))
        .bind(t.id.as_uuid())
        .bind(t.tenant_id.as_uuid())
        .bind(t.part_id.as_uuid())
        .bind(t.location_id.as_uuid())
        .bind(t.kind.as_str())
        .bind(t.direction.as_str())
        .bind(t.quantity_before)
        .bind(t.quantity_change)
        .bind(t.quantity_after)
        .bind(t.unit_cost)
        .bind(t.performed_by.as_uuid())
        .bind(t.source.map(|s| s.kind.as_str()))
        .bind(t.source.map(|s| s.id))
        .bind(t.source.and_then(|s| s.line_id))
        .bind(t.reason.as_deref())
        .bind(&t.metadata)
        .bind(t.occurred_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_transaction", e))?;
        Ok(())
    }

    async fn load_order(
        &mut self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        let row = sqlx::query(
            "SELECT document FROM purchase_orders WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant_id.as_uuid())
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_order", e))?;

        row.as_ref().map(order_from_row).transpose()
    }

    #[instrument(
        skip_all,
        fields(tenant_id = %tenant_id, order_id = %order.id_typed(), expected = ?expected),
        err
    )]
    async fn save_order(
        &mut self,
        tenant_id: TenantId,
        order: &PurchaseOrder,
        expected: ExpectedVersion,
    ) -> StoreResult<()> {
        if order.tenant_id() != Some(tenant_id) {
            return Err(StoreError::TenantIsolation(format!(
                "purchase order {} does not belong to tenant {tenant_id}",
                order.id_typed()
            )));
        }
        let vendor_id = order
            .vendor_id()
            .ok_or_else(|| StoreError::Backend("purchase order has no vendor".to_string()))?;
        let location_id = order
            .location_id()
            .ok_or_else(|| StoreError::Backend("purchase order has no location".to_string()))?;
        let document = serde_json::to_value(order)
            .map_err(|e| StoreError::Backend(format!("order serialization failed: {e}")))?;
        let created_at = order.created_at().unwrap_or_else(Utc::now);
        let updated_at = order.updated_at().unwrap_or(created_at);

        let result = match expected {
            ExpectedVersion::Exact(version) => {
                sqlx::query(
                    r#"
                    UPDATE purchase_orders
                    SET vendor_id = $3, location_id = $4, status = $5, version = $6,
                        document = $7, updated_at = $9
                    WHERE tenant_id = $1 AND id = $2 AND version = $10
                    "#,
                )
                .bind(tenant_id.as_uuid())
                .bind(order.id_typed().as_uuid())
                .bind(vendor_id.as_uuid())
                .bind(location_id.as_uuid())
                .bind(order.status().as_str())
                .bind(order.version() as i64)
                .bind(&document)
                .bind(created_at)
                .bind(updated_at)
                .bind(version as i64)
                .execute(&mut *self.tx)
                .await
            }
            ExpectedVersion::Absent | ExpectedVersion::Any => {
                let upsert = if expected == ExpectedVersion::Any {
                    "ON CONFLICT (tenant_id, id) DO UPDATE SET vendor_id = EXCLUDED.vendor_id, \
                     location_id = EXCLUDED.location_id, status = EXCLUDED.status, \
                     version = EXCLUDED.version, document = EXCLUDED.document, \
                     updated_at = EXCLUDED.updated_at"
                } else {
                    ""
                };
                sqlx::query(&format!(
                    "INSERT INTO purchase_orders \
                     (tenant_id, id, vendor_id, location_id, status, version, document, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) {upsert}"
                ))
                .bind(tenant_id.as_uuid())
                .bind(order.id_typed().as_uuid())
                .bind(vendor_id.as_uuid())
                .bind(location_id.as_uuid())
                .bind(order.status().as_str())
                .bind(order.version() as i64)
                .bind(&document)
                .bind(created_at)
                .bind(updated_at)
                .execute(&mut *self.tx)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("save_order", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "purchase order {} is no longer at {expected:?}",
                order.id_typed()
            )));
        }
        Ok(())
    }

    async fn delete_order(
        &mut self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        expected: ExpectedVersion,
    ) -> StoreResult<()> {
        let version = match expected {
            ExpectedVersion::Exact(v) => Some(v as i64),
            ExpectedVersion::Any => None,
            ExpectedVersion::Absent => {
                return Err(StoreError::Conflict(format!(
                    "purchase order {order_id} cannot be deleted while expected absent"
                )));
            }
        };
        let result = sqlx::query(
            r#"
            DELETE FROM purchase_orders
            WHERE tenant_id = $1 AND id = $2 AND ($3::bigint IS NULL OR version = $3)
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(order_id.as_uuid())
        .bind(version)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("delete_order", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "purchase order {order_id} is no longer at {expected:?}"
            )));
        }
        Ok(())
    }

    async fn append_order_history(&mut self, entries: &[OrderHistoryEntry]) -> StoreResult<()> {
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO purchase_order_history (
                    event_id, tenant_id, order_id, sequence, event_type,
                    event_version, actor, occurred_at, payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(entry.event_id)
            .bind(entry.tenant_id.as_uuid())
            .bind(entry.order_id.as_uuid())
            .bind(entry.sequence as i64)
            .bind(&entry.event_type)
            .bind(entry.event_version as i32)
            .bind(entry.actor.as_uuid())
            .bind(entry.occurred_at)
            .bind(&entry.payload)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("append_order_history", e))?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresLedgerTx { tx }))
    }

    async fn get_part(&self, tenant_id: TenantId, part_id: PartId) -> StoreResult<Option<Part>> {
        let row = sqlx::query(&format!(
            "SELECT {PART_COLUMNS} FROM parts WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(part_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_part", e))?;

        row.as_ref().map(part_from_row).transpose()
    }

    async fn get_location(
        &self,
        tenant_id: TenantId,
        location_id: LocationId,
    ) -> StoreResult<Option<PartLocation>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, name, deleted_at
            FROM part_locations
            WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(location_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_location", e))?;

        row.as_ref().map(location_from_row).transpose()
    }

    async fn get_stock(&self, key: StockKey) -> StoreResult<Option<PartStock>> {
        let row = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM part_stock \
             WHERE tenant_id = $1 AND part_id = $2 AND location_id = $3"
        ))
        .bind(key.tenant_id.as_uuid())
        .bind(key.part_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_stock", e))?;

        row.as_ref().map(stock_from_row).transpose()
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id), err)]
    async fn list_stock(&self, tenant_id: TenantId, filter: StockFilter) -> StoreResult<Vec<PartStock>> {
        let rows = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM part_stock \
             WHERE tenant_id = $1 \
               AND ($2::uuid IS NULL OR part_id = $2) \
               AND ($3::uuid IS NULL OR location_id = $3) \
               AND (NOT $4 OR (threshold > 0 AND quantity <= threshold)) \
             ORDER BY part_id, location_id"
        ))
        .bind(tenant_id.as_uuid())
        .bind(filter.part_id.map(|p| *p.as_uuid()))
        .bind(filter.location_id.map(|l| *l.as_uuid()))
        .bind(filter.below_threshold)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_stock", e))?;

        rows.iter().map(stock_from_row).collect()
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id), err)]
    async fn query_transactions(
        &self,
        tenant_id: TenantId,
        filter: TransactionFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<PartTransaction>> {
        const WHERE: &str = "WHERE tenant_id = $1 \
            AND ($2::uuid IS NULL OR part_id = $2) \
            AND ($3::uuid IS NULL OR location_id = $3) \
            AND ($4::text IS NULL OR type = $4) \
            AND ($5::uuid IS NULL OR performed_by = $5) \
            AND ($6::timestamptz IS NULL OR occurred_at >= $6) \
            AND ($7::timestamptz IS NULL OR occurred_at <= $7)";

        let part_param = filter.part_id.map(|p| *p.as_uuid());
        let location_param = filter.location_id.map(|l| *l.as_uuid());
        let kind_param = filter.kind.map(|k| k.as_str());
        let performer_param = filter.performed_by.map(|u| *u.as_uuid());

        let count_row = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM part_transactions {WHERE}"
        ))
        .bind(tenant_id.as_uuid())
        .bind(part_param)
        .bind(location_param)
        .bind(kind_param)
        .bind(performer_param)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_transactions", e))?;
        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| decode_error("total", e))?;

        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM part_transactions {WHERE} \
             ORDER BY occurred_at DESC, created_at DESC LIMIT $8 OFFSET $9"
        ))
        .bind(tenant_id.as_uuid())
        .bind(part_param)
        .bind(location_param)
        .bind(kind_param)
        .bind(performer_param)
        .bind(filter.from)
        .bind(filter.to)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_transactions", e))?;

        let items = rows
            .iter()
            .map(transaction_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        Span::current().record("row_count", items.len());
        Ok(Page::new(items, total as u64, pagination))
    }

    async fn get_order(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        let row = sqlx::query("SELECT document FROM purchase_orders WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id.as_uuid())
            .bind(order_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_order", e))?;

        row.as_ref().map(order_from_row).transpose()
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id), err)]
    async fn list_orders(
        &self,
        tenant_id: TenantId,
        filter: OrderFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<PurchaseOrder>> {
        const WHERE: &str = "WHERE tenant_id = $1 \
            AND ($2::text IS NULL OR status = $2) \
            AND ($3::uuid IS NULL OR vendor_id = $3)";

        let status_param = filter.status.map(|s| s.as_str());
        let vendor_param = filter.vendor_id.map(|v| *v.as_uuid());

        let count_row = sqlx::query(&format!("SELECT COUNT(*) AS total FROM purchase_orders {WHERE}"))
            .bind(tenant_id.as_uuid())
            .bind(status_param)
            .bind(vendor_param)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_orders", e))?;
        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| decode_error("total", e))?;

        let rows = sqlx::query(&format!(
            "SELECT document FROM purchase_orders {WHERE} \
             ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5"
        ))
        .bind(tenant_id.as_uuid())
        .bind(status_param)
        .bind(vendor_param)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_orders", e))?;

        let items = rows
            .iter()
            .map(order_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, pagination))
    }

    async fn order_history(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> StoreResult<Vec<OrderHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, tenant_id, order_id, sequence, event_type,
                   event_version, actor, occurred_at, payload
            FROM purchase_order_history
            WHERE tenant_id = $1 AND order_id = $2
            ORDER BY sequence ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(order_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("order_history", e))?;

        rows.iter().map(history_from_row).collect()
    }

    async fn count_by_field(&self, tenant_id: TenantId, source: UsageSource, id: Uuid) -> StoreResult<u64> {
        let sql = match source {
            UsageSource::StockByPart => {
                "SELECT COUNT(*) AS total FROM part_stock WHERE tenant_id = $1 AND part_id = $2"
            }
            UsageSource::StockByLocation => {
                "SELECT COUNT(*) AS total FROM part_stock WHERE tenant_id = $1 AND location_id = $2"
            }
            UsageSource::TransactionsByPart => {
                "SELECT COUNT(*) AS total FROM part_transactions WHERE tenant_id = $1 AND part_id = $2"
            }
            UsageSource::TransactionsByLocation => {
                "SELECT COUNT(*) AS total FROM part_transactions WHERE tenant_id = $1 AND location_id = $2"
            }
            UsageSource::OrdersByVendor => {
                "SELECT COUNT(*) AS total FROM purchase_orders WHERE tenant_id = $1 AND vendor_id = $2"
            }
            UsageSource::OrdersByLocation => {
                "SELECT COUNT(*) AS total FROM purchase_orders WHERE tenant_id = $1 AND location_id = $2"
            }
            UsageSource::OrderLinesByPart => {
                "SELECT COUNT(*) AS total \
                 FROM purchase_orders po, jsonb_array_elements(po.document -> 'lines') AS line \
                 WHERE po.tenant_id = $1 AND (line -> 'part' ->> 'part_id')::uuid = $2"
            }
        };

        let row = sqlx::query(sql)
            .bind(tenant_id.as_uuid())
            .bind(id)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_by_field", e))?;
        let total: i64 = row.try_get("total").map_err(|e| decode_error("total", e))?;
        Ok(total as u64)
    }
}

// Row decoding

fn decode_error(column: &str, err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to read column {column}: {err}"))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(|e| decode_error(column, e))
}

fn parse<T>(value: &str, column: &str) -> StoreResult<T>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    value
        .parse()
        .map_err(|e| StoreError::Backend(format!("invalid {column} '{value}': {e}")))
}

fn part_from_row(row: &PgRow) -> StoreResult<Part> {
    Ok(Part {
        id: PartId::from_uuid(get(row, "id")?),
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        part_number: get(row, "part_number")?,
        name: get(row, "name")?,
        measurement_unit: get(row, "measurement_unit")?,
        unit_cost: get(row, "unit_cost")?,
        average_unit_cost: get(row, "average_unit_cost")?,
    })
}

fn location_from_row(row: &PgRow) -> StoreResult<PartLocation> {
    Ok(PartLocation {
        id: LocationId::from_uuid(get(row, "id")?),
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        name: get(row, "name")?,
        deleted_at: get(row, "deleted_at")?,
    })
}

fn vendor_from_row(row: &PgRow) -> StoreResult<Vendor> {
    Ok(Vendor {
        id: VendorId::from_uuid(get(row, "id")?),
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        name: get(row, "name")?,
        contact_email: get(row, "contact_email")?,
        deleted_at: get(row, "deleted_at")?,
    })
}

fn stock_from_row(row: &PgRow) -> StoreResult<PartStock> {
    let key = StockKey::new(
        TenantId::from_uuid(get(row, "tenant_id")?),
        PartId::from_uuid(get(row, "part_id")?),
        LocationId::from_uuid(get(row, "location_id")?),
    );
    let version: i64 = get(row, "version")?;
    Ok(PartStock::restore(
        key,
        get(row, "quantity")?,
        get(row, "threshold")?,
        version as u64,
        get(row, "updated_at")?,
    ))
}

fn transaction_from_row(row: &PgRow) -> StoreResult<PartTransaction> {
    let kind: String = get(row, "type")?;
    let direction: String = get(row, "direction")?;
    let source_type: Option<String> = get(row, "source_type")?;
    let source_id: Option<Uuid> = get(row, "source_id")?;
    let source = match (source_type, source_id) {
        (Some(kind), Some(id)) => Some(SourceDocument {
            kind: parse::<SourceDocumentKind>(&kind, "source_type")?,
            id,
            line_id: get(row, "source_line_id")?,
        }),
        _ => None,
    };

    Ok(PartTransaction {
        id: TransactionId::from_uuid(get(row, "id")?),
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        part_id: PartId::from_uuid(get(row, "part_id")?),
        location_id: LocationId::from_uuid(get(row, "location_id")?),
        kind: parse::<TransactionType>(&kind, "type")?,
        direction: parse::<Direction>(&direction, "direction")?,
        quantity_before: get(row, "quantity_before")?,
        quantity_change: get(row, "quantity_change")?,
        quantity_after: get(row, "quantity_after")?,
        unit_cost: get(row, "unit_cost")?,
        performed_by: UserId::from_uuid(get(row, "performed_by")?),
        source,
        reason: get(row, "reason")?,
        metadata: get(row, "metadata")?,
        occurred_at: get(row, "occurred_at")?,
    })
}

fn order_from_row(row: &PgRow) -> StoreResult<PurchaseOrder> {
    let document: serde_json::Value = get(row, "document")?;
    serde_json::from_value(document)
        .map_err(|e| StoreError::Backend(format!("failed to deserialize purchase order: {e}")))
}

fn history_from_row(row: &PgRow) -> StoreResult<OrderHistoryEntry> {
    let sequence: i64 = get(row, "sequence")?;
    let event_version: i32 = get(row, "event_version")?;
    Ok(OrderHistoryEntry {
        event_id: get(row, "event_id")?,
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        order_id: PurchaseOrderId::from_uuid(get(row, "order_id")?),
        sequence: sequence as u64,
        event_type: get(row, "event_type")?,
        event_version: event_version as u32,
        actor: UserId::from_uuid(get(row, "actor")?),
        occurred_at: get(row, "occurred_at")?,
        payload: get(row, "payload")?,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // unique violation, serialization failure, deadlock
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
