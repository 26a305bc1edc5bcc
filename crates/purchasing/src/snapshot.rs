//! Point-in-time copies of catalog records embedded in purchase orders.
//!
//! A snapshot is taken when a header or line is first written and is carried
//! unchanged afterwards, so an order keeps describing what was ordered even if
//! the catalog record is renamed or removed later.

use serde::{Deserialize, Serialize};

use partledger_core::ValueObject;
use partledger_inventory::{LocationId, Part, PartId, PartLocation};

use crate::vendor::{Vendor, VendorId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorSnapshot {
    pub vendor_id: VendorId,
    pub name: String,
    pub contact_email: Option<String>,
}

impl ValueObject for VendorSnapshot {}

impl From<&Vendor> for VendorSnapshot {
    fn from(vendor: &Vendor) -> Self {
        Self {
            vendor_id: vendor.id,
            name: vendor.name.clone(),
            contact_email: vendor.contact_email.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationSnapshot {
    pub location_id: LocationId,
    pub name: String,
}

impl ValueObject for LocationSnapshot {}

impl From<&PartLocation> for LocationSnapshot {
    fn from(location: &PartLocation) -> Self {
        Self {
            location_id: location.id,
            name: location.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartSnapshot {
    pub part_id: PartId,
    pub part_number: String,
    pub name: String,
    pub measurement_unit: String,
}

impl ValueObject for PartSnapshot {}

impl From<&Part> for PartSnapshot {
    fn from(part: &Part) -> Self {
        Self {
            part_id: part.id,
            part_number: part.part_number.clone(),
            name: part.name.clone(),
            measurement_unit: part.measurement_unit.clone(),
        }
    }
}
