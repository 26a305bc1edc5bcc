//! Purchasing domain: purchase orders, vendors and order snapshots.
//!
//! The order is a pure aggregate (commands in, events out). Stock effects of a
//! receipt are carried on `GoodsReceived` and applied to the ledger by the
//! purchase-order workflow in `partledger-infra`.

pub mod order;
pub mod snapshot;
pub mod totals;
pub mod vendor;

pub use order::{
    Approve, CreatePurchaseOrder, GoodsReceived, LineId, LineInput, LineReceipt, MarkPurchased,
    OrderDraft, OrderLine, PurchaseOrder, PurchaseOrderApproved, PurchaseOrderCommand,
    PurchaseOrderCreated, PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderPurchased,
    PurchaseOrderRejected, PurchaseOrderStatus, PurchaseOrderUpdated, ReceiveGoods, ReceiveLine,
    Reject, UpdatePurchaseOrder,
};
pub use snapshot::{LocationSnapshot, PartSnapshot, VendorSnapshot};
pub use totals::{AmountKind, Charge, OrderCharges, Totals, compute_totals, line_amount};
pub use vendor::{Vendor, VendorId};
