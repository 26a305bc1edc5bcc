//! Parts inventory ledger domain.
//!
//! Pure business rules for stock rows, movements, audit entries, weighted
//! average costing and transfer planning. Storage and transactions live in
//! `partledger-infra`; nothing in this crate performs IO.

pub mod costing;
pub mod movement;
pub mod part;
pub mod stock;
pub mod transaction;
pub mod transfer;

pub use costing::{CostUpdate, weighted_average_cost};
pub use movement::MovementRequest;
pub use part::{LocationId, Part, PartId, PartLocation};
pub use stock::{PartStock, StockKey, StockMovement};
pub use transaction::{
    Direction, PartTransaction, SourceDocument, SourceDocumentKind, TransactionId,
    TransactionType,
};
pub use transfer::{TransferPlan, TransferRequest};
