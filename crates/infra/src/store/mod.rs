//! Ledger persistence boundary.
//!
//! A [`LedgerStore`] hands out [`LedgerTx`] units of work: every stock change,
//! its audit row, any cost-average update and any purchase-order write made
//! through one unit of work commit or roll back together.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::{InMemoryLedgerStore, InMemoryLedgerTx};
pub use postgres::{PostgresLedgerStore, PostgresLedgerTx};
pub use query::{OrderFilter, Page, Pagination, StockFilter, TransactionFilter};
pub use r#trait::{LedgerStore, LedgerTx, OrderHistoryEntry, StoreError, StoreResult};
