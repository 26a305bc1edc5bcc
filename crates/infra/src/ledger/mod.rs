//! Inventory ledger: the movement write path and the operations built on it.

pub mod cost_averager;
pub mod recorder;
pub mod service;
pub mod transfer;

pub use cost_averager::CostAverager;
pub use recorder::{InventoryActivityRecorder, RecordedMovement};
pub use service::LedgerService;
pub use transfer::{StockTransferCoordinator, TransferOutcome};
