//! Purchase-order workflow: runs order commands and applies their stock effects.
//!
//! Every operation is one unit of work:
//!
//! ```text
//! request
//!   ↓
//! 1. shape validation (no reads yet)
//!   ↓
//! 2. resolve vendor / location / parts into snapshots (create, update)
//!   ↓
//! 3. load the order, handle the command, apply the events
//!   ↓
//! 4. save the order (compare-and-swap) and append history entries
//!   ↓
//! 5. on GoodsReceived: per line, re-average cost then record the receipt
//!   ↓
//! 6. commit
//! ```
//!
//! A failure at any step drops the unit of work, so an order is never left
//! with received quantities that the ledger does not reflect (or vice versa).

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use partledger_core::{Aggregate, AggregateRoot, Event, ExpectedVersion, TenantId, UserId};
use partledger_inventory::{
    CostUpdate, LocationId, MovementRequest, PartId, SourceDocument, SourceDocumentKind,
    TransactionType,
};
use partledger_purchasing::{
    Approve, CreatePurchaseOrder, GoodsReceived, LineId, LineInput, LocationSnapshot,
    MarkPurchased, OrderCharges, OrderDraft, PartSnapshot, PurchaseOrder, PurchaseOrderCommand,
    PurchaseOrderEvent, PurchaseOrderId, ReceiveGoods, ReceiveLine, Reject, UpdatePurchaseOrder,
    VendorId, VendorSnapshot,
};

use crate::error::{RetryPolicy, ServiceError, ServiceResult};
use crate::ledger::{CostAverager, InventoryActivityRecorder, RecordedMovement};
use crate::store::{LedgerStore, LedgerTx, OrderFilter, OrderHistoryEntry, Page, Pagination};

/// One order line as submitted by a caller (references, not snapshots).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRequest {
    /// Existing line being edited; `None` adds a line.
    #[serde(default)]
    pub line_id: Option<LineId>,
    pub part_id: PartId,
    pub quantity_ordered: i64,
    pub unit_cost: Decimal,
}

/// Create/update payload for a purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub vendor_id: VendorId,
    pub location_id: LocationId,
    pub lines: Vec<LineRequest>,
    #[serde(default)]
    pub charges: OrderCharges,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub expected_delivery_date: Option<NaiveDate>,
}

impl OrderRequest {
    /// Checks that need no stored data.
    pub fn validate(&self) -> ServiceResult<()> {
        if self.lines.is_empty() {
            return Err(ServiceError::Validation(
                "purchase order must have at least one line".to_string(),
            ));
        }
        for line in &self.lines {
            if line.quantity_ordered <= 0 {
                return Err(ServiceError::Validation(format!(
                    "quantity ordered must be positive for part {}",
                    line.part_id
                )));
            }
            if line.unit_cost.is_sign_negative() {
                return Err(ServiceError::Validation(format!(
                    "unit cost cannot be negative for part {}",
                    line.part_id
                )));
            }
        }
        self.charges.validate()?;
        Ok(())
    }
}

/// Order state after a receipt plus the ledger entries it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveOutcome {
    pub order: PurchaseOrder,
    pub movements: Vec<RecordedMovement>,
    pub cost_updates: Vec<CostUpdate>,
}

#[derive(Clone)]
pub struct PurchaseOrderWorkflow {
    store: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
    recorder: InventoryActivityRecorder,
    averager: CostAverager,
}

impl PurchaseOrderWorkflow {
    pub fn new(store: Arc<dyn LedgerStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            recorder: InventoryActivityRecorder::new(),
            averager: CostAverager::new(),
        }
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id, actor = %actor), err)]
    pub async fn create(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        request: OrderRequest,
    ) -> ServiceResult<PurchaseOrder> {
        request.validate()?;
        let order_id = PurchaseOrderId::new();

        let request = &request;
        let order = self
            .retry
            .run("purchase_order.create", move || async move {
                let mut tx = self.store.begin().await?;
                let draft = resolve_draft(tx.as_mut(), tenant_id, None, request).await?;
                let command = PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                    tenant_id,
                    order_id,
                    draft,
                    created_by: actor,
                    occurred_at: Utc::now(),
                });
                let (order, _) =
                    execute(tx.as_mut(), tenant_id, PurchaseOrder::empty(order_id), &command)
                        .await?;
                tx.commit().await?;
                Ok::<_, ServiceError>(order)
            })
            .await?;

        info!(order_id = %order_id, total = %order.totals().total, "purchase order created");
        Ok(order)
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id, order_id = %order_id), err)]
    pub async fn update(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        order_id: PurchaseOrderId,
        request: OrderRequest,
    ) -> ServiceResult<PurchaseOrder> {
        request.validate()?;

        let request = &request;
        let order = self
            .retry
            .run("purchase_order.update", move || async move {
                let mut tx = self.store.begin().await?;
                let current = load(tx.as_mut(), tenant_id, order_id).await?;
                let draft = resolve_draft(tx.as_mut(), tenant_id, Some(&current), request).await?;
                let command = PurchaseOrderCommand::UpdatePurchaseOrder(UpdatePurchaseOrder {
                    tenant_id,
                    order_id,
                    draft,
                    updated_by: actor,
                    occurred_at: Utc::now(),
                });
                let (order, _) = execute(tx.as_mut(), tenant_id, current, &command).await?;
                tx.commit().await?;
                Ok::<_, ServiceError>(order)
            })
            .await?;

        info!(status = %order.status(), "purchase order updated");
        Ok(order)
    }

    pub async fn approve(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        order_id: PurchaseOrderId,
    ) -> ServiceResult<PurchaseOrder> {
        let command = PurchaseOrderCommand::Approve(Approve {
            tenant_id,
            order_id,
            approved_by: actor,
            occurred_at: Utc::now(),
        });
        self.transition("purchase_order.approve", tenant_id, order_id, command)
            .await
    }

    pub async fn reject(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        order_id: PurchaseOrderId,
        reason: String,
    ) -> ServiceResult<PurchaseOrder> {
        let command = PurchaseOrderCommand::Reject(Reject {
            tenant_id,
            order_id,
            rejected_by: actor,
            reason,
            occurred_at: Utc::now(),
        });
        self.transition("purchase_order.reject", tenant_id, order_id, command)
            .await
    }

    pub async fn mark_purchased(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        order_id: PurchaseOrderId,
        payment_reference: Option<String>,
    ) -> ServiceResult<PurchaseOrder> {
        let command = PurchaseOrderCommand::MarkPurchased(MarkPurchased {
            tenant_id,
            order_id,
            purchased_by: actor,
            payment_reference,
            occurred_at: Utc::now(),
        });
        self.transition("purchase_order.mark_purchased", tenant_id, order_id, command)
            .await
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id, order_id = %order_id, op = operation), err)]
    async fn transition(
        &self,
        operation: &'static str,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        command: PurchaseOrderCommand,
    ) -> ServiceResult<PurchaseOrder> {
        let command = &command;
        let order = self
            .retry
            .run(operation, move || async move {
                let mut tx = self.store.begin().await?;
                let current = load(tx.as_mut(), tenant_id, order_id).await?;
                let (order, _) = execute(tx.as_mut(), tenant_id, current, command).await?;
                tx.commit().await?;
                Ok::<_, ServiceError>(order)
            })
            .await?;

        info!(status = %order.status(), "purchase order transitioned");
        Ok(order)
    }

    /// Receive one increment of goods against an order.
    ///
    /// The whole batch is checked before anything is written; a single bad
    /// line rejects the batch.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, order_id = %order_id, lines = lines.len()), err)]
    pub async fn receive(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        order_id: PurchaseOrderId,
        lines: Vec<ReceiveLine>,
    ) -> ServiceResult<ReceiveOutcome> {
        let command = PurchaseOrderCommand::ReceiveGoods(ReceiveGoods {
            tenant_id,
            order_id,
            lines,
            received_by: actor,
            occurred_at: Utc::now(),
        });

        let command = &command;
        let outcome = self
            .retry
            .run("purchase_order.receive", move || {
                self.try_receive(tenant_id, order_id, command)
            })
            .await?;

        info!(
            status = %outcome.order.status(),
            movements = outcome.movements.len(),
            "goods received"
        );
        Ok(outcome)
    }

    async fn try_receive(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        command: &PurchaseOrderCommand,
    ) -> ServiceResult<ReceiveOutcome> {
        let mut tx = self.store.begin().await?;
        let current = load(tx.as_mut(), tenant_id, order_id).await?;
        let (order, events) = execute(tx.as_mut(), tenant_id, current, command).await?;

        let mut movements = Vec::new();
        let mut cost_updates = Vec::new();
        for event in &events {
            if let PurchaseOrderEvent::GoodsReceived(received) = event {
                let (moved, costed) = self.post_receipts(tx.as_mut(), received).await?;
                movements.extend(moved);
                cost_updates.extend(costed);
            }
        }

        tx.commit().await?;
        Ok(ReceiveOutcome {
            order,
            movements,
            cost_updates,
        })
    }

    async fn post_receipts(
        &self,
        tx: &mut dyn LedgerTx,
        received: &GoodsReceived,
    ) -> ServiceResult<(Vec<RecordedMovement>, Vec<CostUpdate>)> {
        let mut movements = Vec::with_capacity(received.receipts.len());
        let mut cost_updates = Vec::with_capacity(received.receipts.len());

        for receipt in &received.receipts {
            // Averaging reads on-hand before this line's units land.
            cost_updates.push(
                self.averager
                    .apply_receipt(
                        tx,
                        received.tenant_id,
                        receipt.part_id,
                        receipt.quantity,
                        receipt.unit_cost,
                    )
                    .await?,
            );

            let source = SourceDocument::new(
                SourceDocumentKind::PurchaseOrder,
                *received.order_id.as_uuid(),
            )
            .with_line(*receipt.line_id.as_uuid());
            let request = MovementRequest::new(
                received.tenant_id,
                receipt.part_id,
                received.location_id,
                TransactionType::PurchaseReceipt,
                receipt.quantity,
                received.received_by,
            )
            .with_source(source)
            .with_unit_cost(receipt.unit_cost)
            .at(received.occurred_at);

            movements.push(self.recorder.record(tx, request).await?);
        }

        Ok((movements, cost_updates))
    }

    /// Delete an order that has not reached purchasing or receiving.
    #[instrument(skip_all, fields(tenant_id = %tenant_id, order_id = %order_id), err)]
    pub async fn delete(&self, tenant_id: TenantId, order_id: PurchaseOrderId) -> ServiceResult<()> {
        self.retry
            .run("purchase_order.delete", move || async move {
                let mut tx = self.store.begin().await?;
                let current = load(tx.as_mut(), tenant_id, order_id).await?;
                current.ensure_deletable()?;
                tx.delete_order(
                    tenant_id,
                    order_id,
                    ExpectedVersion::from_loaded(current.version()),
                )
                .await?;
                tx.commit().await?;
                Ok::<_, ServiceError>(())
            })
            .await?;

        info!("purchase order deleted");
        Ok(())
    }

    pub async fn get(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> ServiceResult<PurchaseOrder> {
        self.store
            .get_order(tenant_id, order_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("purchase order {order_id}")))
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        filter: OrderFilter,
        pagination: Pagination,
    ) -> ServiceResult<Page<PurchaseOrder>> {
        Ok(self.store.list_orders(tenant_id, filter, pagination).await?)
    }

    /// Recorded transitions of an order, oldest first.
    pub async fn history(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> ServiceResult<Vec<OrderHistoryEntry>> {
        self.get(tenant_id, order_id).await?;
        Ok(self.store.order_history(tenant_id, order_id).await?)
    }
}

async fn load(
    tx: &mut dyn LedgerTx,
    tenant_id: TenantId,
    order_id: PurchaseOrderId,
) -> ServiceResult<PurchaseOrder> {
    tx.load_order(tenant_id, order_id)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("purchase order {order_id}")))
}

/// Handle, apply, persist and record history for one command.
async fn execute(
    tx: &mut dyn LedgerTx,
    tenant_id: TenantId,
    mut order: PurchaseOrder,
    command: &PurchaseOrderCommand,
) -> ServiceResult<(PurchaseOrder, Vec<PurchaseOrderEvent>)> {
    let base_version = order.version();
    let events = order.handle(command)?;
    for event in &events {
        order.apply(event);
    }

    tx.save_order(tenant_id, &order, ExpectedVersion::from_loaded(base_version))
        .await?;
    let entries = history_entries(tenant_id, order.id_typed(), base_version, &events)?;
    tx.append_order_history(&entries).await?;

    Ok((order, events))
}

fn history_entries(
    tenant_id: TenantId,
    order_id: PurchaseOrderId,
    base_version: u64,
    events: &[PurchaseOrderEvent],
) -> ServiceResult<Vec<OrderHistoryEntry>> {
    events
        .iter()
        .zip(base_version + 1..)
        .map(|(event, sequence)| {
            let payload = serde_json::to_value(event).map_err(|e| {
                ServiceError::Storage(format!("serialize {}: {e}", event.event_type()))
            })?;
            Ok(OrderHistoryEntry {
                event_id: Uuid::now_v7(),
                tenant_id,
                order_id,
                sequence,
                event_type: event.event_type().to_string(),
                event_version: Event::version(event),
                actor: event.actor(),
                occurred_at: event.occurred_at(),
                payload,
            })
        })
        .collect()
}

/// Turn references into snapshots. Entities the order already carries keep
/// their stored snapshot, so later catalog edits never rewrite an order.
async fn resolve_draft(
    tx: &mut dyn LedgerTx,
    tenant_id: TenantId,
    current: Option<&PurchaseOrder>,
    request: &OrderRequest,
) -> ServiceResult<OrderDraft> {
    let vendor = match current.and_then(|o| o.vendor()) {
        Some(snapshot) if snapshot.vendor_id == request.vendor_id => snapshot.clone(),
        _ => tx
            .get_vendor(tenant_id, request.vendor_id)
            .await?
            .map(|v| VendorSnapshot::from(&v))
            .ok_or_else(|| ServiceError::not_found(format!("vendor {}", request.vendor_id)))?,
    };

    let location = match current.and_then(|o| o.location()) {
        Some(snapshot) if snapshot.location_id == request.location_id => snapshot.clone(),
        _ => tx
            .get_location(tenant_id, request.location_id)
            .await?
            .map(|l| LocationSnapshot::from(&l))
            .ok_or_else(|| {
                ServiceError::not_found(format!("location {}", request.location_id))
            })?,
    };

    let mut lines = Vec::with_capacity(request.lines.len());
    for line in &request.lines {
        let existing = line
            .line_id
            .and_then(|id| current.and_then(|o| o.line(id)))
            .filter(|l| l.part_id() == line.part_id);
        let part = match existing {
            Some(l) => l.part.clone(),
            None => tx
                .get_part(tenant_id, line.part_id)
                .await?
                .map(|p| PartSnapshot::from(&p))
                .ok_or_else(|| ServiceError::not_found(format!("part {}", line.part_id)))?,
        };
        lines.push(LineInput {
            line_id: line.line_id,
            part,
            quantity_ordered: line.quantity_ordered,
            unit_cost: line.unit_cost,
        });
    }

    Ok(OrderDraft {
        vendor,
        location,
        lines,
        charges: request.charges,
        notes: request.notes.clone(),
        expected_delivery_date: request.expected_delivery_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use partledger_inventory::{Part, PartLocation};
    use partledger_purchasing::{PurchaseOrderStatus, Vendor};

    use crate::store::InMemoryLedgerStore;

    struct Fixture {
        workflow: PurchaseOrderWorkflow,
        store: Arc<InMemoryLedgerStore>,
        tenant: TenantId,
        user: UserId,
        vendor: Vendor,
        location: PartLocation,
        part: Part,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryLedgerStore::new());
        let tenant = TenantId::new();
        let vendor = Vendor::new(tenant, "Acme Supply");
        let location = PartLocation::new(tenant, "Dock");
        let part = Part::new(tenant, "P-42", "Pump", "pcs", Decimal::new(10, 0));
        store.insert_vendor(vendor.clone()).unwrap();
        store.insert_location(location.clone()).unwrap();
        store.insert_part(part.clone()).unwrap();
        Fixture {
            workflow: PurchaseOrderWorkflow::new(store.clone(), RetryPolicy::default()),
            store,
            tenant,
            user: UserId::new(),
            vendor,
            location,
            part,
        }
    }

    fn order_request(f: &Fixture, quantity: i64) -> OrderRequest {
        OrderRequest {
            vendor_id: f.vendor.id,
            location_id: f.location.id,
            lines: vec![LineRequest {
                line_id: None,
                part_id: f.part.id,
                quantity_ordered: quantity,
                unit_cost: Decimal::new(10, 0),
            }],
            charges: OrderCharges::default(),
            notes: None,
            expected_delivery_date: None,
        }
    }

    #[tokio::test]
    async fn create_snapshots_references_and_records_history() {
        let f = fixture();
        let order = f
            .workflow
            .create(f.tenant, f.user, order_request(&f, 5))
            .await
            .unwrap();

        assert_eq!(order.status(), PurchaseOrderStatus::PendingApproval);
        assert_eq!(order.vendor().unwrap().name, "Acme Supply");
        assert_eq!(order.lines()[0].part.part_number, "P-42");
        assert_eq!(order.totals().total, Decimal::new(50, 0));

        let history = f.workflow.history(f.tenant, order.id_typed()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type, "purchasing.order.created");
        assert_eq!(history[0].sequence, 1);
    }

    #[tokio::test]
    async fn unknown_vendor_is_not_found() {
        let f = fixture();
        let mut request = order_request(&f, 5);
        request.vendor_id = VendorId::new();

        let err = f.workflow.create(f.tenant, f.user, request).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn empty_order_is_rejected_before_lookups() {
        let f = fixture();
        let mut request = order_request(&f, 5);
        request.lines.clear();
        request.vendor_id = VendorId::new();

        let err = f.workflow.create(f.tenant, f.user, request).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn update_keeps_snapshot_of_unchanged_part() {
        let f = fixture();
        let order = f
            .workflow
            .create(f.tenant, f.user, order_request(&f, 5))
            .await
            .unwrap();

        let mut renamed = f.part.clone();
        renamed.name = "Pump (rev B)".to_string();
        f.store.insert_part(renamed).unwrap();

        let mut request = order_request(&f, 8);
        request.lines[0].line_id = Some(order.lines()[0].id);
        let updated = f
            .workflow
            .update(f.tenant, f.user, order.id_typed(), request)
            .await
            .unwrap();

        assert_eq!(updated.lines()[0].part.name, "Pump");
        assert_eq!(updated.lines()[0].quantity_ordered, 8);
        assert_eq!(updated.lines()[0].id, order.lines()[0].id);
    }

    #[tokio::test]
    async fn receive_posts_linked_ledger_entries() {
        let f = fixture();
        let order = f
            .workflow
            .create(f.tenant, f.user, order_request(&f, 10))
            .await
            .unwrap();
        let id = order.id_typed();
        f.workflow.approve(f.tenant, f.user, id).await.unwrap();

        let line_id = order.lines()[0].id;
        let outcome = f
            .workflow
            .receive(f.tenant, f.user, id, vec![ReceiveLine { line_id, quantity: 4 }])
            .await
            .unwrap();

        assert_eq!(outcome.order.status(), PurchaseOrderStatus::PartialReceived);
        assert_eq!(outcome.movements.len(), 1);
        let entry = &outcome.movements[0].transaction;
        assert_eq!(entry.kind, TransactionType::PurchaseReceipt);
        assert_eq!(entry.quantity_after, 4);
        assert_eq!(entry.unit_cost, Some(Decimal::new(10, 0)));
        let source = entry.source.unwrap();
        assert_eq!(source.kind, SourceDocumentKind::PurchaseOrder);
        assert_eq!(source.id, *id.as_uuid());
        assert_eq!(source.line_id, Some(*line_id.as_uuid()));
    }

    #[tokio::test]
    async fn receive_before_approval_is_invalid_transition() {
        let f = fixture();
        let order = f
            .workflow
            .create(f.tenant, f.user, order_request(&f, 10))
            .await
            .unwrap();

        let err = f
            .workflow
            .receive(
                f.tenant,
                f.user,
                order.id_typed(),
                vec![ReceiveLine {
                    line_id: order.lines()[0].id,
                    quantity: 1,
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn other_tenant_cannot_see_order() {
        let f = fixture();
        let order = f
            .workflow
            .create(f.tenant, f.user, order_request(&f, 1))
            .await
            .unwrap();

        let err = f
            .workflow
            .approve(TenantId::new(), f.user, order.id_typed())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
