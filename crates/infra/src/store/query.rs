//! Read-side filters and pagination for ledger and order listings.
//!
//! All queries are tenant-scoped and paginated by default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use partledger_core::UserId;
use partledger_inventory::{LocationId, PartId, TransactionType};
use partledger_purchasing::{PurchaseOrderStatus, VendorId};

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 1000;

/// Pagination parameters for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of rows to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    /// Slice an already filtered and ordered result set.
    pub fn page<T: Clone>(&self, rows: &[T]) -> Page<T> {
        let total = rows.len() as u64;
        let items = rows
            .iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .cloned()
            .collect();
        Page::new(items, total, *self)
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Rows matching the filter across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let has_more = total > u64::from(pagination.offset) + u64::from(pagination.limit);
        Self {
            items,
            total,
            pagination,
            has_more,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            pagination: self.pagination,
            has_more: self.has_more,
        }
    }
}

/// Audit feed filter. Date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub part_id: Option<PartId>,
    pub location_id: Option<LocationId>,
    pub kind: Option<TransactionType>,
    pub performed_by: Option<UserId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockFilter {
    pub part_id: Option<PartId>,
    pub location_id: Option<LocationId>,
    pub below_threshold: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilter {
    pub status: Option<PurchaseOrderStatus>,
    pub vendor_id: Option<VendorId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        assert_eq!(Pagination::new(None, None).limit, DEFAULT_LIMIT);
        assert_eq!(Pagination::new(Some(5000), None).limit, MAX_LIMIT);
        assert_eq!(Pagination::new(Some(0), None).limit, 1);
    }

    #[test]
    fn page_reports_has_more() {
        let rows: Vec<u32> = (0..7).collect();
        let page = Pagination::new(Some(3), Some(3)).page(&rows);
        assert_eq!(page.items, vec![3, 4, 5]);
        assert_eq!(page.total, 7);
        assert!(page.has_more);

        let last = Pagination::new(Some(3), Some(6)).page(&rows);
        assert_eq!(last.items, vec![6]);
        assert!(!last.has_more);
    }
}
