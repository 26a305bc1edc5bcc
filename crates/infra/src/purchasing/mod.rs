//! Purchase-order orchestration over the ledger store.

pub mod workflow;

pub use workflow::{LineRequest, OrderRequest, PurchaseOrderWorkflow, ReceiveOutcome};
