use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use partledger_core::{AggregateRoot, ExpectedVersion, TenantId};
use partledger_inventory::{
    LocationId, Part, PartId, PartLocation, PartStock, PartTransaction, StockKey,
};
use partledger_purchasing::{PurchaseOrder, PurchaseOrderId, Vendor, VendorId};

use super::query::{OrderFilter, Page, Pagination, StockFilter, TransactionFilter};
use super::r#trait::{LedgerStore, LedgerTx, OrderHistoryEntry, StoreError, StoreResult};
use crate::registry::UsageSource;

#[derive(Debug, Clone)]
struct PartRow {
    part: Part,
    version: u64,
}

#[derive(Debug, Clone)]
struct LocationRow {
    location: PartLocation,
    version: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    parts: HashMap<(TenantId, PartId), PartRow>,
    locations: HashMap<(TenantId, LocationId), LocationRow>,
    vendors: HashMap<(TenantId, VendorId), Vendor>,
    stock: HashMap<StockKey, PartStock>,
    transactions: Vec<PartTransaction>,
    orders: HashMap<(TenantId, PurchaseOrderId), PurchaseOrder>,
    history: Vec<OrderHistoryEntry>,
}

/// A versioned row a unit of work has read.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum RowRef {
    Part(TenantId, PartId),
    Location(TenantId, LocationId),
    Stock(StockKey),
    Order(TenantId, PurchaseOrderId),
}

impl LedgerState {
    fn version_of(&self, row: RowRef) -> Option<u64> {
        match row {
            RowRef::Part(t, p) => self.parts.get(&(t, p)).map(|r| r.version),
            RowRef::Location(t, l) => self.locations.get(&(t, l)).map(|r| r.version),
            RowRef::Stock(key) => self.stock.get(&key).map(|s| s.version()),
            RowRef::Order(t, o) => self.orders.get(&(t, o)).map(|o| o.version()),
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Units of work are optimistic: writes are buffered
/// and `commit` re-checks the version of every row the unit of work read,
/// failing with [`StoreError::Conflict`] if any of them moved. Every movement
/// locks its part, and committing bumps the part version, so two units of
/// work touching the same part cannot both commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a catalog part (owned by part CRUD in a full deployment).
    pub fn insert_part(&self, part: Part) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state
            .parts
            .insert((part.tenant_id, part.id), PartRow { part, version: 1 });
        Ok(())
    }

    pub fn insert_location(&self, location: PartLocation) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.locations.insert(
            (location.tenant_id, location.id),
            LocationRow {
                location,
                version: 1,
            },
        );
        Ok(())
    }

    pub fn insert_vendor(&self, vendor: Vendor) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.vendors.insert((vendor.tenant_id, vendor.id), vendor);
        Ok(())
    }

    fn read<R>(&self, f: impl FnOnce(&LedgerState) -> R) -> StoreResult<R> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(f(&state))
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
        Ok(Box::new(InMemoryLedgerTx::new(self.state.clone())))
    }

    async fn get_part(&self, tenant_id: TenantId, part_id: PartId) -> StoreResult<Option<Part>> {
        self.read(|s| s.parts.get(&(tenant_id, part_id)).map(|r| r.part.clone()))
    }

    async fn get_location(
        &self,
        tenant_id: TenantId,
        location_id: LocationId,
    ) -> StoreResult<Option<PartLocation>> {
        self.read(|s| {
            s.locations
                .get(&(tenant_id, location_id))
                .map(|r| r.location.clone())
                .filter(PartLocation::is_active)
        })
    }

    async fn get_stock(&self, key: StockKey) -> StoreResult<Option<PartStock>> {
        self.read(|s| s.stock.get(&key).cloned())
    }

    async fn list_stock(&self, tenant_id: TenantId, filter: StockFilter) -> StoreResult<Vec<PartStock>> {
        let mut rows = self.read(|s| {
            s.stock
                .values()
                .filter(|stock| {
                    let key = stock.key();
                    key.tenant_id == tenant_id
                        && filter.part_id.is_none_or(|p| p == key.part_id)
                        && filter.location_id.is_none_or(|l| l == key.location_id)
                        && (!filter.below_threshold || stock.is_below_threshold())
                })
                .cloned()
                .collect::<Vec<_>>()
        })?;
        rows.sort_by_key(|stock| stock.key());
        Ok(rows)
    }

    async fn query_transactions(
        &self,
        tenant_id: TenantId,
        filter: TransactionFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<PartTransaction>> {
        let mut rows = self.read(|s| {
            s.transactions
                .iter()
                .rev()
                .filter(|t| {
                    t.tenant_id == tenant_id
                        && filter.part_id.is_none_or(|p| p == t.part_id)
                        && filter.location_id.is_none_or(|l| l == t.location_id)
                        && filter.kind.is_none_or(|k| k == t.kind)
                        && filter.performed_by.is_none_or(|u| u == t.performed_by)
                        && filter.from.is_none_or(|from| t.occurred_at >= from)
                        && filter.to.is_none_or(|to| t.occurred_at <= to)
                })
                .cloned()
                .collect::<Vec<_>>()
        })?;
        rows.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(pagination.page(&rows))
    }

    async fn get_order(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        self.read(|s| s.orders.get(&(tenant_id, order_id)).cloned())
    }

    async fn list_orders(
        &self,
        tenant_id: TenantId,
        filter: OrderFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<PurchaseOrder>> {
        let mut rows = self.read(|s| {
            s.orders
                .iter()
                .filter(|((t, _), order)| {
                    *t == tenant_id
                        && filter.status.is_none_or(|st| st == order.status())
                        && filter.vendor_id.is_none_or(|v| Some(v) == order.vendor_id())
                })
                .map(|(_, order)| order.clone())
                .collect::<Vec<_>>()
        })?;
        rows.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });
        Ok(pagination.page(&rows))
    }

    async fn order_history(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> StoreResult<Vec<OrderHistoryEntry>> {
        let mut entries = self.read(|s| {
            s.history
                .iter()
                .filter(|e| e.tenant_id == tenant_id && e.order_id == order_id)
                .cloned()
                .collect::<Vec<_>>()
        })?;
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    async fn count_by_field(&self, tenant_id: TenantId, source: UsageSource, id: Uuid) -> StoreResult<u64> {
        self.read(|s| {
            let count = match source {
                UsageSource::StockByPart => s
                    .stock
                    .keys()
                    .filter(|k| k.tenant_id == tenant_id && *k.part_id.as_uuid() == id)
                    .count(),
                UsageSource::StockByLocation => s
                    .stock
                    .keys()
                    .filter(|k| k.tenant_id == tenant_id && *k.location_id.as_uuid() == id)
                    .count(),
                UsageSource::TransactionsByPart => s
                    .transactions
                    .iter()
                    .filter(|t| t.tenant_id == tenant_id && *t.part_id.as_uuid() == id)
                    .count(),
                UsageSource::TransactionsByLocation => s
                    .transactions
                    .iter()
                    .filter(|t| t.tenant_id == tenant_id && *t.location_id.as_uuid() == id)
                    .count(),
                UsageSource::OrdersByVendor => s
                    .orders
                    .iter()
                    .filter(|((t, _), o)| {
                        *t == tenant_id && o.vendor_id().is_some_and(|v| *v.as_uuid() == id)
                    })
                    .count(),
                UsageSource::OrdersByLocation => s
                    .orders
                    .iter()
                    .filter(|((t, _), o)| {
                        *t == tenant_id && o.location_id().is_some_and(|l| *l.as_uuid() == id)
                    })
                    .count(),
                UsageSource::OrderLinesByPart => s
                    .orders
                    .iter()
                    .filter(|((t, _), _)| *t == tenant_id)
                    .flat_map(|(_, o)| o.lines())
                    .filter(|line| *line.part_id().as_uuid() == id)
                    .count(),
            };
            count as u64
        })
    }
}

/// Buffered unit of work over [`InMemoryLedgerStore`].
pub struct InMemoryLedgerTx {
    state: Arc<RwLock<LedgerState>>,
    /// Version of every row as first read (`None` = absent).
    observed: HashMap<RowRef, Option<u64>>,
    locked_parts: HashSet<(TenantId, PartId)>,
    parts: HashMap<(TenantId, PartId), PartRow>,
    locations: HashMap<(TenantId, LocationId), LocationRow>,
    /// `None` marks a removed row.
    stock: HashMap<StockKey, Option<PartStock>>,
    transactions: Vec<PartTransaction>,
    /// `None` marks a deleted order.
    orders: HashMap<(TenantId, PurchaseOrderId), Option<PurchaseOrder>>,
    history: Vec<OrderHistoryEntry>,
}

impl InMemoryLedgerTx {
    fn new(state: Arc<RwLock<LedgerState>>) -> Self {
        Self {
            state,
            observed: HashMap::new(),
            locked_parts: HashSet::new(),
            parts: HashMap::new(),
            locations: HashMap::new(),
            stock: HashMap::new(),
            transactions: Vec::new(),
            orders: HashMap::new(),
            history: Vec::new(),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&LedgerState) -> R) -> StoreResult<R> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(f(&state))
    }

    /// First observation wins; later reads see this unit of work's own writes.
    fn observe(&mut self, row: RowRef, version: Option<u64>) {
        self.observed.entry(row).or_insert(version);
    }

    fn part_row(&mut self, tenant_id: TenantId, part_id: PartId) -> StoreResult<Option<PartRow>> {
        let key = (tenant_id, part_id);
        if let Some(row) = self.parts.get(&key) {
            return Ok(Some(row.clone()));
        }
        let row = self.read(|s| s.parts.get(&key).cloned())?;
        self.observe(RowRef::Part(tenant_id, part_id), row.as_ref().map(|r| r.version));
        Ok(row)
    }

    fn location_row(
        &mut self,
        tenant_id: TenantId,
        location_id: LocationId,
    ) -> StoreResult<Option<LocationRow>> {
        let key = (tenant_id, location_id);
        if let Some(row) = self.locations.get(&key) {
            return Ok(Some(row.clone()));
        }
        let row = self.read(|s| s.locations.get(&key).cloned())?;
        self.observe(
            RowRef::Location(tenant_id, location_id),
            row.as_ref().map(|r| r.version),
        );
        Ok(row)
    }

    fn current_stock(&mut self, key: StockKey) -> StoreResult<Option<PartStock>> {
        if let Some(pending) = self.stock.get(&key) {
            return Ok(pending.clone());
        }
        let stock = self.read(|s| s.stock.get(&key).cloned())?;
        self.observe(RowRef::Stock(key), stock.as_ref().map(|s| s.version()));
        Ok(stock)
    }

    fn current_order(
        &mut self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        let key = (tenant_id, order_id);
        if let Some(pending) = self.orders.get(&key) {
            return Ok(pending.clone());
        }
        let order = self.read(|s| s.orders.get(&key).cloned())?;
        self.observe(RowRef::Order(tenant_id, order_id), order.as_ref().map(|o| o.version()));
        Ok(order)
    }
}

#[async_trait::async_trait]
impl LedgerTx for InMemoryLedgerTx {
    async fn get_part(&mut self, tenant_id: TenantId, part_id: PartId) -> StoreResult<Option<Part>> {
        let key = (tenant_id, part_id);
        if let Some(row) = self.parts.get(&key) {
            return Ok(Some(row.part.clone()));
        }
        self.read(|s| s.parts.get(&key).map(|r| r.part.clone()))
    }

    async fn lock_part(&mut self, tenant_id: TenantId, part_id: PartId) -> StoreResult<Option<Part>> {
        let row = self.part_row(tenant_id, part_id)?;
        if row.is_some() {
            self.locked_parts.insert((tenant_id, part_id));
        }
        Ok(row.map(|r| r.part))
    }

    async fn set_average_cost(
        &mut self,
        tenant_id: TenantId,
        part_id: PartId,
        average: Decimal,
    ) -> StoreResult<()> {
        let mut row = self
            .part_row(tenant_id, part_id)?
            .ok_or_else(|| StoreError::NotFound(format!("part {part_id}")))?;
        row.part.average_unit_cost = Some(average);
        self.parts.insert((tenant_id, part_id), row);
        Ok(())
    }

    async fn get_location(
        &mut self,
        tenant_id: TenantId,
        location_id: LocationId,
    ) -> StoreResult<Option<PartLocation>> {
        Ok(self
            .location_row(tenant_id, location_id)?
            .map(|r| r.location)
            .filter(PartLocation::is_active))
    }

    async fn get_vendor(&mut self, tenant_id: TenantId, vendor_id: VendorId) -> StoreResult<Option<Vendor>> {
        self.read(|s| {
            s.vendors
                .get(&(tenant_id, vendor_id))
                .filter(|v| v.is_active())
                .cloned()
        })
    }

    async fn remove_location(
        &mut self,
        tenant_id: TenantId,
        location_id: LocationId,
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut row = self
            .location_row(tenant_id, location_id)?
            .filter(|r| r.location.is_active())
            .ok_or_else(|| StoreError::NotFound(format!("location {location_id}")))?;
        row.location.deleted_at = Some(at);
        self.locations.insert((tenant_id, location_id), row);

        let mut keys: HashSet<StockKey> = self.read(|s| {
            s.stock
                .keys()
                .filter(|k| k.tenant_id == tenant_id && k.location_id == location_id)
                .copied()
                .collect()
        })?;
        keys.extend(
            self.stock
                .iter()
                .filter(|(k, v)| k.tenant_id == tenant_id && k.location_id == location_id && v.is_some())
                .map(|(k, _)| *k),
        );

        let mut removed = 0;
        for key in keys {
            if self.current_stock(key)?.is_some() {
                self.stock.insert(key, None);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn get_stock(&mut self, key: StockKey) -> StoreResult<Option<PartStock>> {
        self.current_stock(key)
    }

    async fn put_stock(&mut self, stock: &PartStock, expected: ExpectedVersion) -> StoreResult<()> {
        let key = stock.key();
        let current = self.current_stock(key)?.map(|s| s.version());
        if !expected.matches(current) {
            return Err(StoreError::Conflict(format!(
                "stock for {key}: expected {expected:?}, found {current:?}"
            )));
        }
        self.stock.insert(key, Some(stock.clone()));
        Ok(())
    }

    async fn total_quantity(&mut self, tenant_id: TenantId, part_id: PartId) -> StoreResult<i64> {
        let mut quantities: HashMap<StockKey, i64> = self.read(|s| {
            s.stock
                .values()
                .filter(|st| st.key().tenant_id == tenant_id && st.key().part_id == part_id)
                .map(|st| (st.key(), st.quantity()))
                .collect()
        })?;
        for (key, pending) in &self.stock {
            if key.tenant_id != tenant_id || key.part_id != part_id {
                continue;
            }
            match pending {
                Some(stock) => {
                    quantities.insert(*key, stock.quantity());
                }
                None => {
                    quantities.remove(key);
                }
            }
        }
        Ok(quantities
            .values()
            .fold(0i64, |total, qty| total.saturating_add(*qty)))
    }

    async fn append_transaction(&mut self, transaction: &PartTransaction) -> StoreResult<()> {
        self.transactions.push(transaction.clone());
        Ok(())
    }

    async fn load_order(
        &mut self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        self.current_order(tenant_id, order_id)
    }

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
        let order_id = order.id_typed();
        let current = self.current_order(tenant_id, order_id)?.map(|o| o.version());
        if !expected.matches(current) {
            return Err(StoreError::Conflict(format!(
                "purchase order {order_id}: expected {expected:?}, found {current:?}"
            )));
        }
        self.orders.insert((tenant_id, order_id), Some(order.clone()));
        Ok(())
    }

    async fn delete_order(
        &mut self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        expected: ExpectedVersion,
    ) -> StoreResult<()> {
        let current = self.current_order(tenant_id, order_id)?.map(|o| o.version());
        if current.is_none() {
            return Err(StoreError::NotFound(format!("purchase order {order_id}")));
        }
        if !expected.matches(current) {
            return Err(StoreError::Conflict(format!(
                "purchase order {order_id}: expected {expected:?}, found {current:?}"
            )));
        }
        self.orders.insert((tenant_id, order_id), None);
        Ok(())
    }

    async fn append_order_history(&mut self, entries: &[OrderHistoryEntry]) -> StoreResult<()> {
        self.history.extend_from_slice(entries);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        let mut state = this.state.write().map_err(|_| poisoned())?;

        for (row, seen) in &this.observed {
            let now = state.version_of(*row);
            if now != *seen {
                return Err(StoreError::Conflict(format!(
                    "{row:?} changed since it was read (read {seen:?}, now {now:?})"
                )));
            }
        }

        let mut parts = this.parts;
        let touched: HashSet<(TenantId, PartId)> =
            this.locked_parts.into_iter().chain(parts.keys().copied()).collect();
        for key in touched {
            let row = parts.remove(&key).or_else(|| state.parts.get(&key).cloned());
            if let Some(mut row) = row {
                row.version += 1;
                state.parts.insert(key, row);
            }
        }

        for (key, mut row) in this.locations {
            row.version += 1;
            state.locations.insert(key, row);
        }

        for (key, stock) in this.stock {
            match stock {
                Some(stock) => {
                    state.stock.insert(key, stock);
                }
                None => {
                    state.stock.remove(&key);
                }
            }
        }

        state.transactions.extend(this.transactions);

        for (key, order) in this.orders {
            match order {
                Some(order) => {
                    state.orders.insert(key, order);
                }
                None => {
                    state.orders.remove(&key);
                    state
                        .history
                        .retain(|e| !(e.tenant_id == key.0 && e.order_id == key.1));
                }
            }
        }

        state.history.extend(this.history);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partledger_inventory::StockMovement;

    fn seeded() -> (InMemoryLedgerStore, TenantId, Part, PartLocation) {
        let store = InMemoryLedgerStore::new();
        let tenant_id = TenantId::new();
        let part = Part::new(tenant_id, "P-1", "Brake pad", "pcs", Decimal::from(10));
        let location = PartLocation::new(tenant_id, "Main depot");
        store.insert_part(part.clone()).unwrap();
        store.insert_location(location.clone()).unwrap();
        (store, tenant_id, part, location)
    }

    fn moved(stock: &PartStock, change: i64) -> PartStock {
        let mut next = stock.clone();
        let movement: StockMovement = next.plan(change).unwrap();
        next.apply(&movement, Utc::now()).unwrap();
        next
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let (store, tenant_id, part, location) = seeded();
        let key = StockKey::new(tenant_id, part.id, location.id);

        {
            let mut tx = store.begin().await.unwrap();
            let stock = moved(&PartStock::empty(key), 5);
            tx.put_stock(&stock, ExpectedVersion::Absent).await.unwrap();
            assert_eq!(tx.total_quantity(tenant_id, part.id).await.unwrap(), 5);
        }

        assert!(store.get_stock(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_unit_of_work_fails_on_commit() {
        let (store, tenant_id, part, location) = seeded();
        let key = StockKey::new(tenant_id, part.id, location.id);

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        for tx in [&mut first, &mut second] {
            tx.lock_part(tenant_id, part.id).await.unwrap();
            assert!(tx.get_stock(key).await.unwrap().is_none());
            let stock = moved(&PartStock::empty(key), 3);
            tx.put_stock(&stock, ExpectedVersion::Absent).await.unwrap();
        }

        first.commit().await.unwrap();
        assert!(matches!(second.commit().await, Err(StoreError::Conflict(_))));
        assert_eq!(store.get_stock(key).await.unwrap().unwrap().quantity(), 3);
    }

    #[tokio::test]
    async fn put_stock_checks_expected_version() {
        let (store, tenant_id, part, location) = seeded();
        let key = StockKey::new(tenant_id, part.id, location.id);
        let mut tx = store.begin().await.unwrap();
        let stock = moved(&PartStock::empty(key), 3);
        let err = tx.put_stock(&stock, ExpectedVersion::Exact(7)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn removing_a_location_drops_its_stock() {
        let (store, tenant_id, part, location) = seeded();
        let key = StockKey::new(tenant_id, part.id, location.id);

        let mut tx = store.begin().await.unwrap();
        tx.put_stock(&moved(&PartStock::empty(key), 4), ExpectedVersion::Absent)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.remove_location(tenant_id, location.id, Utc::now()).await.unwrap(), 1);
        assert!(tx.get_location(tenant_id, location.id).await.unwrap().is_none());
        tx.commit().await.unwrap();

        assert!(store.get_stock(key).await.unwrap().is_none());
        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.remove_location(tenant_id, location.id, Utc::now()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reads_are_tenant_scoped() {
        let (store, _tenant_id, part, _location) = seeded();
        let other = TenantId::new();
        assert!(store.get_part(other, part.id).await.unwrap().is_none());
        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_part(other, part.id).await.unwrap().is_none());
    }
}
