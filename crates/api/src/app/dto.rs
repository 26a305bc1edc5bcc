use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use partledger_core::{AggregateRoot, UserId};
use partledger_infra::{RecordedMovement, TransferOutcome};
use partledger_inventory::{LocationId, PartId, PartStock, TransactionType};
use partledger_purchasing::{PurchaseOrder, PurchaseOrderStatus, ReceiveLine, VendorId};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct AdjustmentRequest {
    pub part_id: PartId,
    pub location_id: LocationId,
    /// Signed; positive adds stock.
    pub quantity_change: i64,
    /// Defaults to `manual-adjustment`.
    #[serde(default, rename = "type")]
    pub kind: Option<TransactionType>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
pub struct TransferBody {
    pub part_id: PartId,
    pub from_location_id: LocationId,
    pub to_location_id: LocationId,
    pub quantity: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdBody {
    pub threshold: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct StockQuery {
    pub part_id: Option<PartId>,
    pub location_id: Option<LocationId>,
    #[serde(default)]
    pub below_threshold: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    pub part_id: Option<PartId>,
    pub location_id: Option<LocationId>,
    #[serde(rename = "type")]
    pub kind: Option<TransactionType>,
    pub performed_by: Option<UserId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderQuery {
    pub status: Option<PurchaseOrderStatus>,
    pub vendor_id: Option<VendorId>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PurchaseBody {
    #[serde(default)]
    pub payment_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveBody {
    pub lines: Vec<ReceiveLine>,
}

// -------------------------
// Response mapping
// -------------------------

pub fn stock_to_json(stock: &PartStock) -> JsonValue {
    let key = stock.key();
    json!({
        "part_id": key.part_id.to_string(),
        "location_id": key.location_id.to_string(),
        "quantity": stock.quantity(),
        "threshold": stock.threshold(),
        "below_threshold": stock.is_below_threshold(),
        "version": stock.version(),
        "updated_at": stock.updated_at(),
    })
}

pub fn movement_to_json(movement: &RecordedMovement) -> JsonValue {
    json!({
        "stock": stock_to_json(&movement.stock),
        "transaction": movement.transaction,
    })
}

pub fn transfer_to_json(outcome: &TransferOutcome) -> JsonValue {
    json!({
        "transfer_id": outcome.transfer_id.to_string(),
        "outbound": movement_to_json(&outcome.outbound),
        "inbound": movement_to_json(&outcome.inbound),
    })
}

pub fn order_to_json(order: &PurchaseOrder) -> JsonValue {
    let totals = order.totals();
    json!({
        "id": order.id_typed().to_string(),
        "status": order.status().as_str(),
        "version": order.version(),
        "vendor": order.vendor(),
        "location": order.location(),
        "lines": order.lines().iter().map(|line| json!({
            "id": line.id.to_string(),
            "part": line.part,
            "quantity_ordered": line.quantity_ordered,
            "quantity_received": line.quantity_received,
            "remaining": line.remaining(),
            "unit_cost": line.unit_cost,
            "amount": line.amount,
        })).collect::<Vec<_>>(),
        "charges": order.charges(),
        "totals": {
            "subtotal": totals.subtotal,
            "discount_amount": totals.discount_amount,
            "tax_amount": totals.tax_amount,
            "shipping": totals.shipping,
            "total": totals.total,
        },
        "notes": order.notes(),
        "expected_delivery_date": order.expected_delivery_date(),
        "created_by": order.created_by(),
        "created_at": order.created_at(),
        "updated_at": order.updated_at(),
        "approved_by": order.approved_by(),
        "approved_at": order.approved_at(),
        "rejection_reason": order.rejection_reason(),
        "purchased_by": order.purchased_by(),
        "purchased_at": order.purchased_at(),
        "payment_reference": order.payment_reference(),
        "received_at": order.received_at(),
    })
}

/// Parse a path segment into a typed id, or a 400 response.
pub fn parse_id<T: core::str::FromStr>(
    raw: &str,
    what: &str,
) -> Result<T, axum::response::Response> {
    raw.parse().map_err(|_| errors::invalid_id(what))
}
