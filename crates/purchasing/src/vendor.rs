use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use partledger_core::{Entity, TenantId, typed_id};

typed_id!(
    /// Vendor identifier (tenant-scoped).
    VendorId
);

/// Vendor as seen by purchasing; owned by the vendor catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: VendorId,
    pub tenant_id: TenantId,
    pub name: String,
    pub contact_email: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Vendor {
    pub fn new(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id: VendorId::new(),
            tenant_id,
            name: name.into(),
            contact_email: None,
            deleted_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

impl Entity for Vendor {
    type Id = VendorId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
