//! Usage registry: which stored records reference a part, location or vendor.
//!
//! The table is fixed at compile time and resolved once when services are
//! built. Each source names one reference field that the store knows how to
//! count; there is no lookup by collection name at call time.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use partledger_core::{DomainError, TenantId};

use crate::store::{LedgerStore, StoreResult};

/// Catalog record kinds that ledger and purchasing data point at.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferencedEntity {
    Part,
    Location,
    Vendor,
}

impl ReferencedEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferencedEntity::Part => "part",
            ReferencedEntity::Location => "location",
            ReferencedEntity::Vendor => "vendor",
        }
    }
}

impl FromStr for ReferencedEntity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "part" => Ok(ReferencedEntity::Part),
            "location" => Ok(ReferencedEntity::Location),
            "vendor" => Ok(ReferencedEntity::Vendor),
            other => Err(DomainError::validation(format!("unknown entity '{other}'"))),
        }
    }
}

/// A stored collection plus the field holding the reference.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    StockByPart,
    StockByLocation,
    TransactionsByPart,
    TransactionsByLocation,
    OrdersByVendor,
    OrdersByLocation,
    OrderLinesByPart,
}

impl UsageSource {
    pub fn collection(&self) -> &'static str {
        match self {
            UsageSource::StockByPart | UsageSource::StockByLocation => "part_stock",
            UsageSource::TransactionsByPart | UsageSource::TransactionsByLocation => {
                "part_transactions"
            }
            UsageSource::OrdersByVendor | UsageSource::OrdersByLocation => "purchase_orders",
            UsageSource::OrderLinesByPart => "purchase_order_lines",
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            UsageSource::StockByPart
            | UsageSource::TransactionsByPart
            | UsageSource::OrderLinesByPart => "part_id",
            UsageSource::StockByLocation
            | UsageSource::TransactionsByLocation
            | UsageSource::OrdersByLocation => "location_id",
            UsageSource::OrdersByVendor => "vendor_id",
        }
    }
}

const PART_SOURCES: &[UsageSource] = &[
    UsageSource::StockByPart,
    UsageSource::TransactionsByPart,
    UsageSource::OrderLinesByPart,
];

const LOCATION_SOURCES: &[UsageSource] = &[
    UsageSource::StockByLocation,
    UsageSource::TransactionsByLocation,
    UsageSource::OrdersByLocation,
];

const VENDOR_SOURCES: &[UsageSource] = &[UsageSource::OrdersByVendor];

const STANDARD_TABLE: &[(ReferencedEntity, &[UsageSource])] = &[
    (ReferencedEntity::Part, PART_SOURCES),
    (ReferencedEntity::Location, LOCATION_SOURCES),
    (ReferencedEntity::Vendor, VENDOR_SOURCES),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCount {
    pub source: UsageSource,
    pub collection: String,
    pub field: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub entity: ReferencedEntity,
    pub id: Uuid,
    pub usages: Vec<UsageCount>,
    pub total: u64,
}

impl UsageSummary {
    pub fn is_referenced(&self) -> bool {
        self.total > 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UsageRegistry {
    table: &'static [(ReferencedEntity, &'static [UsageSource])],
}

impl Default for UsageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl UsageRegistry {
    pub fn standard() -> Self {
        Self {
            table: STANDARD_TABLE,
        }
    }

    pub fn sources(&self, entity: ReferencedEntity) -> &'static [UsageSource] {
        self.table
            .iter()
            .find(|(e, _)| *e == entity)
            .map(|(_, sources)| *sources)
            .unwrap_or(&[])
    }

    pub async fn count_usages(
        &self,
        store: &dyn LedgerStore,
        tenant_id: TenantId,
        entity: ReferencedEntity,
        id: Uuid,
    ) -> StoreResult<UsageSummary> {
        let mut usages = Vec::new();
        for source in self.sources(entity) {
            let count = store.count_by_field(tenant_id, *source, id).await?;
            usages.push(UsageCount {
                source: *source,
                collection: source.collection().to_string(),
                field: source.field().to_string(),
                count,
            });
        }
        let total = usages.iter().map(|u| u.count).sum();
        Ok(UsageSummary {
            entity,
            id,
            usages,
            total,
        })
    }
}
