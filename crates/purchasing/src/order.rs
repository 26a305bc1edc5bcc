use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use partledger_core::{
    Aggregate, AggregateRoot, DomainError, DomainResult, Event, TenantId, UserId, typed_id,
};
use partledger_inventory::{LocationId, PartId};

use crate::snapshot::{LocationSnapshot, PartSnapshot, VendorSnapshot};
use crate::totals::{OrderCharges, Totals, compute_totals, line_amount};
use crate::vendor::VendorId;

typed_id!(
    /// Purchase order identifier (tenant-scoped).
    PurchaseOrderId
);

typed_id!(
    /// Purchase order line identifier, stable for the life of the line.
    LineId
);

/// Purchase order status lifecycle.
///
/// `pending-approval -> approved -> purchased -> partial-received -> received`,
/// with `rejected` reachable only from `pending-approval`. Receiving may also
/// start straight from `approved`. `received` and `rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PurchaseOrderStatus {
    PendingApproval,
    Approved,
    Purchased,
    PartialReceived,
    Received,
    Rejected,
}

impl PurchaseOrderStatus {
    pub const ALL: [PurchaseOrderStatus; 6] = [
        PurchaseOrderStatus::PendingApproval,
        PurchaseOrderStatus::Approved,
        PurchaseOrderStatus::Purchased,
        PurchaseOrderStatus::PartialReceived,
        PurchaseOrderStatus::Received,
        PurchaseOrderStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderStatus::PendingApproval => "pending-approval",
            PurchaseOrderStatus::Approved => "approved",
            PurchaseOrderStatus::Purchased => "purchased",
            PurchaseOrderStatus::PartialReceived => "partial-received",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Received | PurchaseOrderStatus::Rejected
        )
    }

    pub fn can_receive(&self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Approved
                | PurchaseOrderStatus::Purchased
                | PurchaseOrderStatus::PartialReceived
        )
    }

    pub fn can_delete(&self) -> bool {
        !matches!(
            self,
            PurchaseOrderStatus::Purchased
                | PurchaseOrderStatus::PartialReceived
                | PurchaseOrderStatus::Received
        )
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PurchaseOrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown order status '{s}'")))
    }
}

/// Purchase order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: LineId,
    pub part: PartSnapshot,
    pub quantity_ordered: i64,
    pub quantity_received: i64,
    pub unit_cost: Decimal,
    pub amount: Decimal,
}

impl OrderLine {
    pub fn part_id(&self) -> PartId {
        self.part.part_id
    }

    pub fn remaining(&self) -> i64 {
        self.quantity_ordered - self.quantity_received
    }

    pub fn is_fully_received(&self) -> bool {
        self.quantity_received >= self.quantity_ordered
    }
}

/// Line as submitted on create/update. `line_id` keeps an existing line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub line_id: Option<LineId>,
    pub part: PartSnapshot,
    pub quantity_ordered: i64,
    pub unit_cost: Decimal,
}

/// Editable header and line set shared by create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub vendor: VendorSnapshot,
    pub location: LocationSnapshot,
    pub lines: Vec<LineInput>,
    pub charges: OrderCharges,
    pub notes: Option<String>,
    pub expected_delivery_date: Option<NaiveDate>,
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    tenant_id: Option<TenantId>,
    vendor: Option<VendorSnapshot>,
    location: Option<LocationSnapshot>,
    lines: Vec<OrderLine>,
    charges: OrderCharges,
    totals: Totals,
    status: PurchaseOrderStatus,
    notes: Option<String>,
    expected_delivery_date: Option<NaiveDate>,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    approved_by: Option<UserId>,
    approved_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    purchased_by: Option<UserId>,
    purchased_at: Option<DateTime<Utc>>,
    payment_reference: Option<String>,
    received_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            vendor: None,
            location: None,
            lines: Vec::new(),
            charges: OrderCharges::default(),
            totals: Totals::default(),
            status: PurchaseOrderStatus::PendingApproval,
            notes: None,
            expected_delivery_date: None,
            created_by: None,
            created_at: None,
            updated_at: None,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            purchased_by: None,
            purchased_at: None,
            payment_reference: None,
            received_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn vendor(&self) -> Option<&VendorSnapshot> {
        self.vendor.as_ref()
    }

    pub fn vendor_id(&self) -> Option<VendorId> {
        self.vendor.as_ref().map(|v| v.vendor_id)
    }

    pub fn location(&self) -> Option<&LocationSnapshot> {
        self.location.as_ref()
    }

    pub fn location_id(&self) -> Option<LocationId> {
        self.location.as_ref().map(|l| l.location_id)
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn line(&self, line_id: LineId) -> Option<&OrderLine> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    pub fn charges(&self) -> &OrderCharges {
        &self.charges
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn expected_delivery_date(&self) -> Option<NaiveDate> {
        self.expected_delivery_date
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn purchased_by(&self) -> Option<UserId> {
        self.purchased_by
    }

    pub fn purchased_at(&self) -> Option<DateTime<Utc>> {
        self.purchased_at
    }

    pub fn payment_reference(&self) -> Option<&str> {
        self.payment_reference.as_deref()
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }

    pub fn has_receipts(&self) -> bool {
        self.lines.iter().any(|l| l.quantity_received > 0)
    }

    /// Whether the order may be removed. Never-received orders only.
    pub fn ensure_deletable(&self) -> DomainResult<()> {
        self.ensure_created()?;
        if !self.status.can_delete() || self.has_receipts() {
            return Err(DomainError::invalid_transition(format!(
                "purchase order {} cannot be deleted in status {}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub draft: OrderDraft,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePurchaseOrder (header and lines, before any receipt).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePurchaseOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub draft: OrderDraft,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approve {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Reject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reject {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub rejected_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkPurchased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPurchased {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub purchased_by: UserId,
    pub payment_reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveLine {
    pub line_id: LineId,
    pub quantity: i64,
}

/// Command: ReceiveGoods (one receiving increment, possibly several lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveGoods {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub lines: Vec<ReceiveLine>,
    pub received_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    UpdatePurchaseOrder(UpdatePurchaseOrder),
    Approve(Approve),
    Reject(Reject),
    MarkPurchased(MarkPurchased),
    ReceiveGoods(ReceiveGoods),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub vendor: VendorSnapshot,
    pub location: LocationSnapshot,
    pub lines: Vec<OrderLine>,
    pub charges: OrderCharges,
    pub totals: Totals,
    pub notes: Option<String>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderUpdated. Carries the full resulting header and lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderUpdated {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub vendor: VendorSnapshot,
    pub location: LocationSnapshot,
    pub lines: Vec<OrderLine>,
    pub charges: OrderCharges,
    pub totals: Totals,
    pub notes: Option<String>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderApproved {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderRejected {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub rejected_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderPurchased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderPurchased {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub purchased_by: UserId,
    pub payment_reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Quantity booked against one line in a receiving increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReceipt {
    pub line_id: LineId,
    pub part_id: PartId,
    pub quantity: i64,
    pub unit_cost: Decimal,
}

/// Event: GoodsReceived.
///
/// Carries what the ledger needs for each line (part, quantity, cost) plus the
/// order status after the increment. The receiving location is the order's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceived {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub location_id: LocationId,
    pub receipts: Vec<LineReceipt>,
    pub status: PurchaseOrderStatus,
    pub received_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    PurchaseOrderUpdated(PurchaseOrderUpdated),
    PurchaseOrderApproved(PurchaseOrderApproved),
    PurchaseOrderRejected(PurchaseOrderRejected),
    PurchaseOrderPurchased(PurchaseOrderPurchased),
    GoodsReceived(GoodsReceived),
}

impl PurchaseOrderEvent {
    /// User the transition is attributed to.
    pub fn actor(&self) -> UserId {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.created_by,
            PurchaseOrderEvent::PurchaseOrderUpdated(e) => e.updated_by,
            PurchaseOrderEvent::PurchaseOrderApproved(e) => e.approved_by,
            PurchaseOrderEvent::PurchaseOrderRejected(e) => e.rejected_by,
            PurchaseOrderEvent::PurchaseOrderPurchased(e) => e.purchased_by,
            PurchaseOrderEvent::GoodsReceived(e) => e.received_by,
        }
    }
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.order.created",
            PurchaseOrderEvent::PurchaseOrderUpdated(_) => "purchasing.order.updated",
            PurchaseOrderEvent::PurchaseOrderApproved(_) => "purchasing.order.approved",
            PurchaseOrderEvent::PurchaseOrderRejected(_) => "purchasing.order.rejected",
            PurchaseOrderEvent::PurchaseOrderPurchased(_) => "purchasing.order.purchased",
            PurchaseOrderEvent::GoodsReceived(_) => "purchasing.order.goods_received",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderUpdated(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderApproved(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderRejected(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderPurchased(e) => e.occurred_at,
            PurchaseOrderEvent::GoodsReceived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.vendor = Some(e.vendor.clone());
                self.location = Some(e.location.clone());
                self.lines = e.lines.clone();
                self.charges = e.charges;
                self.totals = e.totals;
                self.notes = e.notes.clone();
                self.expected_delivery_date = e.expected_delivery_date;
                self.status = PurchaseOrderStatus::PendingApproval;
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
                self.created = true;
            }
            PurchaseOrderEvent::PurchaseOrderUpdated(e) => {
                self.vendor = Some(e.vendor.clone());
                self.location = Some(e.location.clone());
                self.lines = e.lines.clone();
                self.charges = e.charges;
                self.totals = e.totals;
                self.notes = e.notes.clone();
                self.expected_delivery_date = e.expected_delivery_date;
                self.updated_at = Some(e.occurred_at);
            }
            PurchaseOrderEvent::PurchaseOrderApproved(e) => {
                self.status = PurchaseOrderStatus::Approved;
                self.approved_by = Some(e.approved_by);
                self.approved_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
            }
            PurchaseOrderEvent::PurchaseOrderRejected(e) => {
                self.status = PurchaseOrderStatus::Rejected;
                self.approved_by = Some(e.rejected_by);
                self.approved_at = Some(e.occurred_at);
                self.rejection_reason = Some(e.reason.clone());
                self.updated_at = Some(e.occurred_at);
            }
            PurchaseOrderEvent::PurchaseOrderPurchased(e) => {
                self.status = PurchaseOrderStatus::Purchased;
                self.purchased_by = Some(e.purchased_by);
                self.purchased_at = Some(e.occurred_at);
                self.payment_reference = e.payment_reference.clone();
                self.updated_at = Some(e.occurred_at);
            }
            PurchaseOrderEvent::GoodsReceived(e) => {
                for receipt in &e.receipts {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.id == receipt.line_id) {
                        line.quantity_received += receipt.quantity;
                    }
                }
                self.status = e.status;
                self.received_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
            }
        }

        // +1 per applied event; doubles as the store's compare-and-swap token.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::UpdatePurchaseOrder(cmd) => self.handle_update(cmd),
            PurchaseOrderCommand::Approve(cmd) => self.handle_approve(cmd),
            PurchaseOrderCommand::Reject(cmd) => self.handle_reject(cmd),
            PurchaseOrderCommand::MarkPurchased(cmd) => self.handle_mark_purchased(cmd),
            PurchaseOrderCommand::ReceiveGoods(cmd) => self.handle_receive(cmd),
        }
    }
}

impl PurchaseOrder {
    fn ensure_created(&self) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found(format!(
                "purchase order {} not found",
                self.id
            )));
        }
        Ok(())
    }

    fn ensure_target(&self, tenant_id: TenantId, order_id: PurchaseOrderId) -> DomainResult<()> {
        self.ensure_created()?;
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::not_found(format!(
                "purchase order {} not found",
                self.id
            )));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, allowed: PurchaseOrderStatus, action: &str) -> DomainResult<()> {
        if self.status != allowed {
            return Err(DomainError::invalid_transition(format!(
                "cannot {action} purchase order in status {} (requires {allowed})",
                self.status
            )));
        }
        Ok(())
    }

    /// Validate a draft and turn its inputs into lines.
    ///
    /// Lines that keep an existing `line_id` for the same part keep their
    /// original part snapshot; anything else is captured fresh.
    fn build_lines(&self, draft: &OrderDraft) -> DomainResult<(Vec<OrderLine>, Totals)> {
        if draft.lines.is_empty() {
            return Err(DomainError::validation(
                "purchase order must have at least one line",
            ));
        }
        draft.charges.validate()?;

        let mut seen = HashSet::new();
        let mut lines = Vec::with_capacity(draft.lines.len());
        for input in &draft.lines {
            if input.quantity_ordered <= 0 {
                return Err(DomainError::validation(format!(
                    "quantity ordered must be positive for part {}",
                    input.part.part_number
                )));
            }
            if input.unit_cost.is_sign_negative() {
                return Err(DomainError::validation(format!(
                    "unit cost cannot be negative for part {}",
                    input.part.part_number
                )));
            }

            let existing = match input.line_id {
                Some(line_id) => Some(self.line(line_id).ok_or_else(|| {
                    DomainError::validation(format!("line {line_id} is not on this order"))
                })?),
                None => None,
            };
            let id = existing.map(|l| l.id).unwrap_or_default();
            if !seen.insert(id) {
                return Err(DomainError::validation(format!(
                    "line {id} appears more than once"
                )));
            }

            let part = match existing {
                Some(line) if line.part.part_id == input.part.part_id => line.part.clone(),
                _ => input.part.clone(),
            };

            lines.push(OrderLine {
                id,
                part,
                quantity_ordered: input.quantity_ordered,
                quantity_received: 0,
                unit_cost: input.unit_cost,
                amount: line_amount(input.quantity_ordered, input.unit_cost)?,
            });
        }

        let totals = compute_totals(
            lines.iter().map(|l| (l.quantity_ordered, l.unit_cost)),
            &draft.charges,
        )?;
        Ok((lines, totals))
    }

    fn handle_create(&self, cmd: &CreatePurchaseOrder) -> DomainResult<Vec<PurchaseOrderEvent>> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }

        let (lines, totals) = self.build_lines(&cmd.draft)?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCreated(
            PurchaseOrderCreated {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                vendor: cmd.draft.vendor.clone(),
                location: cmd.draft.location.clone(),
                lines,
                charges: cmd.draft.charges,
                totals,
                notes: cmd.draft.notes.clone(),
                expected_delivery_date: cmd.draft.expected_delivery_date,
                created_by: cmd.created_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_update(&self, cmd: &UpdatePurchaseOrder) -> DomainResult<Vec<PurchaseOrderEvent>> {
        self.ensure_target(cmd.tenant_id, cmd.order_id)?;

        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "cannot edit purchase order in status {}",
                self.status
            )));
        }
        if self.has_receipts() {
            return Err(DomainError::invalid_transition(
                "cannot edit purchase order after goods have been received",
            ));
        }

        let (lines, totals) = self.build_lines(&cmd.draft)?;

        let vendor = match &self.vendor {
            Some(current) if current.vendor_id == cmd.draft.vendor.vendor_id => current.clone(),
            _ => cmd.draft.vendor.clone(),
        };
        let location = match &self.location {
            Some(current) if current.location_id == cmd.draft.location.location_id => {
                current.clone()
            }
            _ => cmd.draft.location.clone(),
        };

        Ok(vec![PurchaseOrderEvent::PurchaseOrderUpdated(
            PurchaseOrderUpdated {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                vendor,
                location,
                lines,
                charges: cmd.draft.charges,
                totals,
                notes: cmd.draft.notes.clone(),
                expected_delivery_date: cmd.draft.expected_delivery_date,
                updated_by: cmd.updated_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_approve(&self, cmd: &Approve) -> DomainResult<Vec<PurchaseOrderEvent>> {
        self.ensure_target(cmd.tenant_id, cmd.order_id)?;
        self.ensure_status(PurchaseOrderStatus::PendingApproval, "approve")?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderApproved(
            PurchaseOrderApproved {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                approved_by: cmd.approved_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_reject(&self, cmd: &Reject) -> DomainResult<Vec<PurchaseOrderEvent>> {
        self.ensure_target(cmd.tenant_id, cmd.order_id)?;
        self.ensure_status(PurchaseOrderStatus::PendingApproval, "reject")?;

        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("rejection reason is required"));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderRejected(
            PurchaseOrderRejected {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                rejected_by: cmd.rejected_by,
                reason: reason.to_string(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_mark_purchased(&self, cmd: &MarkPurchased) -> DomainResult<Vec<PurchaseOrderEvent>> {
        self.ensure_target(cmd.tenant_id, cmd.order_id)?;
        self.ensure_status(PurchaseOrderStatus::Approved, "mark purchased")?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderPurchased(
            PurchaseOrderPurchased {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                purchased_by: cmd.purchased_by,
                payment_reference: cmd
                    .payment_reference
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    /// Every line of the batch is checked before anything is emitted, so a
    /// single bad line rejects the whole increment.
    fn handle_receive(&self, cmd: &ReceiveGoods) -> DomainResult<Vec<PurchaseOrderEvent>> {
        self.ensure_target(cmd.tenant_id, cmd.order_id)?;

        if !self.status.can_receive() {
            return Err(DomainError::invalid_transition(format!(
                "cannot receive goods for purchase order in status {}",
                self.status
            )));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("receive request has no lines"));
        }
        let location_id = self
            .location_id()
            .ok_or_else(|| DomainError::invariant("purchase order has no receiving location"))?;

        let mut seen = HashSet::new();
        let mut receipts = Vec::with_capacity(cmd.lines.len());
        for item in &cmd.lines {
            if item.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "quantity to receive must be positive for line {}",
                    item.line_id
                )));
            }
            if !seen.insert(item.line_id) {
                return Err(DomainError::validation(format!(
                    "line {} appears more than once in the receive request",
                    item.line_id
                )));
            }
            let line = self.line(item.line_id).ok_or_else(|| {
                DomainError::validation(format!(
                    "line {} is not on purchase order {}",
                    item.line_id, self.id
                ))
            })?;
            let received_after = line.quantity_received.checked_add(item.quantity);
            if received_after.is_none_or(|after| after > line.quantity_ordered) {
                return Err(DomainError::validation(format!(
                    "quantityReceived would exceed quantityOrdered for line {} ({} received, {} ordered, {} requested)",
                    line.id, line.quantity_received, line.quantity_ordered, item.quantity
                )));
            }

            receipts.push(LineReceipt {
                line_id: line.id,
                part_id: line.part_id(),
                quantity: item.quantity,
                unit_cost: line.unit_cost,
            });
        }

        let received_of = |line: &OrderLine| {
            line.quantity_received
                + receipts
                    .iter()
                    .filter(|r| r.line_id == line.id)
                    .map(|r| r.quantity)
                    .sum::<i64>()
        };
        let all_received = self
            .lines
            .iter()
            .all(|l| received_of(l) >= l.quantity_ordered);
        let any_received = self.lines.iter().any(|l| received_of(l) > 0);
        let status = if all_received {
            PurchaseOrderStatus::Received
        } else if any_received {
            PurchaseOrderStatus::PartialReceived
        } else {
            self.status
        };

        Ok(vec![PurchaseOrderEvent::GoodsReceived(GoodsReceived {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            location_id,
            receipts,
            status,
            received_by: cmd.received_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::totals::Charge;

    struct Fixture {
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        user: UserId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tenant_id: TenantId::new(),
                order_id: PurchaseOrderId::new(),
                user: UserId::new(),
            }
        }

        fn part(&self, number: &str) -> PartSnapshot {
            PartSnapshot {
                part_id: PartId::new(),
                part_number: number.to_string(),
                name: format!("Part {number}"),
                measurement_unit: "pcs".to_string(),
            }
        }

        fn draft(&self, lines: Vec<(PartSnapshot, i64, i64)>) -> OrderDraft {
            OrderDraft {
                vendor: VendorSnapshot {
                    vendor_id: VendorId::new(),
                    name: "Acme Spares".to_string(),
                    contact_email: None,
                },
                location: LocationSnapshot {
                    location_id: LocationId::new(),
                    name: "Main depot".to_string(),
                },
                lines: lines
                    .into_iter()
                    .map(|(part, qty, cost)| LineInput {
                        line_id: None,
                        part,
                        quantity_ordered: qty,
                        unit_cost: Decimal::from(cost),
                    })
                    .collect(),
                charges: OrderCharges::default(),
                notes: None,
                expected_delivery_date: None,
            }
        }

        fn create(&self, lines: Vec<(PartSnapshot, i64, i64)>) -> PurchaseOrder {
            let mut order = PurchaseOrder::empty(self.order_id);
            self.run(
                &mut order,
                PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                    tenant_id: self.tenant_id,
                    order_id: self.order_id,
                    draft: self.draft(lines),
                    created_by: self.user,
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
            order
        }

        fn run(&self, order: &mut PurchaseOrder, cmd: PurchaseOrderCommand) -> DomainResult<()> {
            let events = order.handle(&cmd)?;
            for event in &events {
                order.apply(event);
            }
            Ok(())
        }

        fn approve(&self) -> PurchaseOrderCommand {
            PurchaseOrderCommand::Approve(Approve {
                tenant_id: self.tenant_id,
                order_id: self.order_id,
                approved_by: self.user,
                occurred_at: Utc::now(),
            })
        }

        fn reject(&self) -> PurchaseOrderCommand {
            PurchaseOrderCommand::Reject(Reject {
                tenant_id: self.tenant_id,
                order_id: self.order_id,
                rejected_by: self.user,
                reason: "over budget".to_string(),
                occurred_at: Utc::now(),
            })
        }

        fn purchase(&self) -> PurchaseOrderCommand {
            PurchaseOrderCommand::MarkPurchased(MarkPurchased {
                tenant_id: self.tenant_id,
                order_id: self.order_id,
                purchased_by: self.user,
                payment_reference: Some("TRX-1".to_string()),
                occurred_at: Utc::now(),
            })
        }

        fn receive(&self, lines: &[(LineId, i64)]) -> PurchaseOrderCommand {
            PurchaseOrderCommand::ReceiveGoods(ReceiveGoods {
                tenant_id: self.tenant_id,
                order_id: self.order_id,
                lines: lines
                    .iter()
                    .map(|(line_id, quantity)| ReceiveLine {
                        line_id: *line_id,
                        quantity: *quantity,
                    })
                    .collect(),
                received_by: self.user,
                occurred_at: Utc::now(),
            })
        }
    }

    #[test]
    fn create_computes_totals_and_starts_pending() {
        let fx = Fixture::new();
        let order = fx.create(vec![(fx.part("P-1"), 100, 10)]);

        assert_eq!(order.status(), PurchaseOrderStatus::PendingApproval);
        assert_eq!(order.totals().subtotal, Decimal::from(1000));
        assert_eq!(order.totals().total, Decimal::from(1000));
        assert_eq!(order.lines()[0].amount, Decimal::from(1000));
        assert_eq!(order.version(), 1);
    }

    #[test]
    fn create_rejects_bad_lines() {
        let fx = Fixture::new();
        let order = PurchaseOrder::empty(fx.order_id);
        for lines in [
            vec![],
            vec![(fx.part("P-1"), 0, 10)],
            vec![(fx.part("P-1"), 5, -1)],
            vec![(fx.part("P-1"), i64::MAX, i64::MAX)],
        ] {
            let err = order
                .handle(&PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                    tenant_id: fx.tenant_id,
                    order_id: fx.order_id,
                    draft: fx.draft(lines),
                    created_by: fx.user,
                    occurred_at: Utc::now(),
                }))
                .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)), "{err:?}");
        }
    }

    #[test]
    fn end_to_end_partial_then_full_receipt() {
        let fx = Fixture::new();
        let mut order = fx.create(vec![(fx.part("P-1"), 100, 10)]);
        let line_id = order.lines()[0].id;

        fx.run(&mut order, fx.approve()).unwrap();
        assert_eq!(order.approved_by(), Some(fx.user));

        fx.run(&mut order, fx.receive(&[(line_id, 40)])).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::PartialReceived);
        assert_eq!(order.lines()[0].quantity_received, 40);

        fx.run(&mut order, fx.receive(&[(line_id, 60)])).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::Received);
        assert!(order.received_at().is_some());

        let err = fx.run(&mut order, fx.receive(&[(line_id, 1)])).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
    }

    #[test]
    fn receive_event_carries_ledger_inputs() {
        let fx = Fixture::new();
        let mut order = fx.create(vec![(fx.part("P-1"), 10, 7)]);
        let line = order.lines()[0].clone();
        fx.run(&mut order, fx.approve()).unwrap();

        let events = order.handle(&fx.receive(&[(line.id, 4)])).unwrap();
        match &events[0] {
            PurchaseOrderEvent::GoodsReceived(e) => {
                assert_eq!(e.location_id, order.location_id().unwrap());
                assert_eq!(e.receipts.len(), 1);
                assert_eq!(e.receipts[0].part_id, line.part_id());
                assert_eq!(e.receipts[0].quantity, 4);
                assert_eq!(e.receipts[0].unit_cost, Decimal::from(7));
                assert_eq!(e.status, PurchaseOrderStatus::PartialReceived);
            }
            other => panic!("expected GoodsReceived, got {other:?}"),
        }
    }

    #[test]
    fn mixed_batch_is_rejected_as_a_whole() {
        let fx = Fixture::new();
        let mut order = fx.create(vec![(fx.part("P-1"), 10, 1), (fx.part("P-2"), 5, 1)]);
        let (a, b) = (order.lines()[0].id, order.lines()[1].id);
        fx.run(&mut order, fx.approve()).unwrap();
        let before = order.clone();

        let err = fx
            .run(&mut order, fx.receive(&[(a, 3), (b, 6)]))
            .unwrap_err();
        match err {
            DomainError::Validation(msg) => {
                assert!(msg.contains("would exceed quantityOrdered"));
                assert!(msg.contains(&b.to_string()));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
        assert_eq!(order, before);
    }

    #[test]
    fn receive_rejects_unknown_and_duplicate_lines() {
        let fx = Fixture::new();
        let mut order = fx.create(vec![(fx.part("P-1"), 10, 1)]);
        let line_id = order.lines()[0].id;
        fx.run(&mut order, fx.approve()).unwrap();

        let err = order.handle(&fx.receive(&[(LineId::new(), 1)])).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let err = order
            .handle(&fx.receive(&[(line_id, 1), (line_id, 1)]))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let err = order.handle(&fx.receive(&[(line_id, 0)])).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn cannot_receive_while_pending() {
        let fx = Fixture::new();
        let order = fx.create(vec![(fx.part("P-1"), 10, 1)]);
        let line_id = order.lines()[0].id;
        let err = order.handle(&fx.receive(&[(line_id, 1)])).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
    }

    #[test]
    fn rejected_order_is_terminal() {
        let fx = Fixture::new();
        let mut order = fx.create(vec![(fx.part("P-1"), 10, 1)]);
        let line_id = order.lines()[0].id;
        fx.run(&mut order, fx.reject()).unwrap();
        assert_eq!(order.rejection_reason(), Some("over budget"));
        assert_eq!(order.approved_by(), Some(fx.user));
        let before = order.clone();

        for cmd in [
            fx.approve(),
            fx.purchase(),
            fx.receive(&[(line_id, 1)]),
            fx.reject(),
        ] {
            let err = fx.run(&mut order, cmd).unwrap_err();
            assert!(matches!(err, DomainError::InvalidStateTransition(_)), "{err:?}");
        }
        assert_eq!(order, before);
    }

    #[test]
    fn purchased_requires_approval_and_keeps_reference() {
        let fx = Fixture::new();
        let mut order = fx.create(vec![(fx.part("P-1"), 10, 1)]);
        assert!(matches!(
            fx.run(&mut order, fx.purchase()),
            Err(DomainError::InvalidStateTransition(_))
        ));

        fx.run(&mut order, fx.approve()).unwrap();
        fx.run(&mut order, fx.purchase()).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::Purchased);
        assert_eq!(order.payment_reference(), Some("TRX-1"));
    }

    #[test]
    fn update_recomputes_totals_and_keeps_snapshots() {
        let fx = Fixture::new();
        let mut order = fx.create(vec![(fx.part("P-1"), 10, 10)]);
        let original = order.lines()[0].clone();

        let mut draft = fx.draft(vec![]);
        draft.vendor = order.vendor().unwrap().clone();
        draft.vendor.name = "Renamed vendor".to_string();
        draft.location = order.location().unwrap().clone();
        let mut renamed = original.part.clone();
        renamed.name = "Renamed part".to_string();
        draft.lines = vec![LineInput {
            line_id: Some(original.id),
            part: renamed,
            quantity_ordered: 20,
            unit_cost: Decimal::from(10),
        }];
        draft.charges.discount = Charge::fixed(Decimal::from(50));

        fx.run(
            &mut order,
            PurchaseOrderCommand::UpdatePurchaseOrder(UpdatePurchaseOrder {
                tenant_id: fx.tenant_id,
                order_id: fx.order_id,
                draft,
                updated_by: fx.user,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        assert_eq!(order.status(), PurchaseOrderStatus::PendingApproval);
        assert_eq!(order.lines()[0].id, original.id);
        assert_eq!(order.lines()[0].part, original.part);
        assert_eq!(order.vendor().unwrap().name, "Acme Spares");
        assert_eq!(order.totals().subtotal, Decimal::from(200));
        assert_eq!(order.totals().total, Decimal::from(150));
    }

    #[test]
    fn update_is_frozen_after_receipt() {
        let fx = Fixture::new();
        let mut order = fx.create(vec![(fx.part("P-1"), 10, 10)]);
        let line_id = order.lines()[0].id;
        fx.run(&mut order, fx.approve()).unwrap();
        fx.run(&mut order, fx.receive(&[(line_id, 1)])).unwrap();

        let err = order
            .handle(&PurchaseOrderCommand::UpdatePurchaseOrder(UpdatePurchaseOrder {
                tenant_id: fx.tenant_id,
                order_id: fx.order_id,
                draft: fx.draft(vec![(fx.part("P-9"), 1, 1)]),
                updated_by: fx.user,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
    }

    #[test]
    fn delete_rules_follow_status() {
        let fx = Fixture::new();
        let mut order = fx.create(vec![(fx.part("P-1"), 10, 10)]);
        let line_id = order.lines()[0].id;
        assert!(order.ensure_deletable().is_ok());

        fx.run(&mut order, fx.approve()).unwrap();
        assert!(order.ensure_deletable().is_ok());

        fx.run(&mut order, fx.purchase()).unwrap();
        assert!(order.ensure_deletable().is_err());

        fx.run(&mut order, fx.receive(&[(line_id, 5)])).unwrap();
        assert!(order.ensure_deletable().is_err());

        let fx = Fixture::new();
        let mut rejected = fx.create(vec![(fx.part("P-1"), 1, 1)]);
        fx.run(&mut rejected, fx.reject()).unwrap();
        assert!(rejected.ensure_deletable().is_ok());
    }

    #[test]
    fn other_tenant_sees_not_found() {
        let fx = Fixture::new();
        let order = fx.create(vec![(fx.part("P-1"), 1, 1)]);
        let err = order
            .handle(&PurchaseOrderCommand::Approve(Approve {
                tenant_id: TenantId::new(),
                order_id: fx.order_id,
                approved_by: fx.user,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn event_names_are_stable() {
        let fx = Fixture::new();
        let order = PurchaseOrder::empty(fx.order_id);
        let events = order
            .handle(&PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                tenant_id: fx.tenant_id,
                order_id: fx.order_id,
                draft: fx.draft(vec![(fx.part("P-1"), 1, 1)]),
                created_by: fx.user,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert_eq!(events[0].event_type(), "purchasing.order.created");
        assert_eq!(events[0].actor(), fx.user);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(128))]

            #[test]
            fn received_never_exceeds_ordered(
                ordered in prop::collection::vec(1i64..50, 1..4),
                batches in prop::collection::vec(prop::collection::vec((0usize..4, -2i64..30), 1..4), 1..10),
            ) {
                let fx = Fixture::new();
                let lines = ordered
                    .iter()
                    .enumerate()
                    .map(|(i, q)| (fx.part(&format!("P-{i}")), *q, 1))
                    .collect();
                let mut order = fx.create(lines);
                fx.run(&mut order, fx.approve()).unwrap();
                let ids: Vec<LineId> = order.lines().iter().map(|l| l.id).collect();

                for batch in batches {
                    let request: Vec<(LineId, i64)> = batch
                        .into_iter()
                        .map(|(idx, qty)| (ids.get(idx).copied().unwrap_or_default(), qty))
                        .collect();
                    let before = order.clone();
                    if fx.run(&mut order, fx.receive(&request)).is_err() {
                        prop_assert_eq!(&order, &before);
                    }
                    for line in order.lines() {
                        prop_assert!(line.quantity_received >= 0);
                        prop_assert!(line.quantity_received <= line.quantity_ordered);
                    }
                }
            }
        }
    }
}
