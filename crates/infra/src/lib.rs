//! Infrastructure layer: ledger storage, the movement write path and the
//! purchase-order workflow.
//!
//! Domain crates stay pure; everything that opens a unit of work, retries on
//! conflicts or talks to Postgres lives here.

pub mod error;
pub mod ledger;
pub mod purchasing;
pub mod registry;
pub mod store;

pub use error::{RetryPolicy, ServiceError, ServiceResult};
pub use ledger::{LedgerService, RecordedMovement, TransferOutcome};
pub use purchasing::{LineRequest, OrderRequest, PurchaseOrderWorkflow, ReceiveOutcome};
pub use registry::{ReferencedEntity, UsageRegistry, UsageSummary};
