use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use partledger_core::{DomainError, TenantId, UserId, typed_id};

use crate::part::{LocationId, PartId};
use crate::stock::StockKey;

typed_id!(
    /// Audit row identifier.
    TransactionId
);

/// Why stock moved.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionType {
    PurchaseReceipt,
    ManualAdjustment,
    TransferIn,
    TransferOut,
    InitialStock,
    Consumption,
}

impl TransactionType {
    pub const ALL: [TransactionType; 6] = [
        TransactionType::PurchaseReceipt,
        TransactionType::ManualAdjustment,
        TransactionType::TransferIn,
        TransactionType::TransferOut,
        TransactionType::InitialStock,
        TransactionType::Consumption,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::PurchaseReceipt => "purchase-receipt",
            TransactionType::ManualAdjustment => "manual-adjustment",
            TransactionType::TransferIn => "transfer-in",
            TransactionType::TransferOut => "transfer-out",
            TransactionType::InitialStock => "initial-stock",
            TransactionType::Consumption => "consumption",
        }
    }

    /// The only direction this type may move stock in; `None` means either.
    pub fn fixed_direction(&self) -> Option<Direction> {
        match self {
            TransactionType::PurchaseReceipt
            | TransactionType::TransferIn
            | TransactionType::InitialStock => Some(Direction::In),
            TransactionType::TransferOut | TransactionType::Consumption => Some(Direction::Out),
            TransactionType::ManualAdjustment => None,
        }
    }
}

impl core::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown transaction type '{s}'")))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn of_change(change: i64) -> Self {
        if change < 0 { Direction::Out } else { Direction::In }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }
}

impl FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" | "in" => Ok(Direction::In),
            "OUT" | "out" => Ok(Direction::Out),
            _ => Err(DomainError::validation(format!("unknown direction '{s}'"))),
        }
    }
}

/// Kind of business document a movement is attributed to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceDocumentKind {
    PurchaseOrder,
    StockTransfer,
    Adjustment,
}

impl SourceDocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceDocumentKind::PurchaseOrder => "purchase-order",
            SourceDocumentKind::StockTransfer => "stock-transfer",
            SourceDocumentKind::Adjustment => "adjustment",
        }
    }
}

impl FromStr for SourceDocumentKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase-order" => Ok(SourceDocumentKind::PurchaseOrder),
            "stock-transfer" => Ok(SourceDocumentKind::StockTransfer),
            "adjustment" => Ok(SourceDocumentKind::Adjustment),
            _ => Err(DomainError::validation(format!("unknown source document kind '{s}'"))),
        }
    }
}

/// Link from an audit row back to the document (and line) that caused it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub kind: SourceDocumentKind,
    pub id: Uuid,
    pub line_id: Option<Uuid>,
}

impl SourceDocument {
    pub fn new(kind: SourceDocumentKind, id: Uuid) -> Self {
        Self {
            kind,
            id,
            line_id: None,
        }
    }

    pub fn with_line(mut self, line_id: Uuid) -> Self {
        self.line_id = Some(line_id);
        self
    }
}

/// Immutable audit row: one per stock movement.
///
/// Stores expose no update path for these rows; the sum of `quantity_change`
/// per stock key always equals that row's current quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartTransaction {
    pub id: TransactionId,
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub location_id: LocationId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub direction: Direction,
    pub quantity_before: i64,
    pub quantity_change: i64,
    pub quantity_after: i64,
    /// Unit cost attached to purchase receipts.
    pub unit_cost: Option<Decimal>,
    pub performed_by: UserId,
    pub source: Option<SourceDocument>,
    pub reason: Option<String>,
    pub metadata: JsonValue,
    pub occurred_at: DateTime<Utc>,
}

impl PartTransaction {
    pub fn stock_key(&self) -> StockKey {
        StockKey::new(self.tenant_id, self.part_id, self.location_id)
    }
}
