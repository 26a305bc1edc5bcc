use partledger_core::{TenantId, UserId};

/// Tenant and acting user for a request.
///
/// Set by [`crate::middleware::request_context`] from headers supplied by the
/// upstream gateway; present on every domain route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestContext {
    tenant_id: TenantId,
    user_id: UserId,
}

impl RequestContext {
    pub fn new(tenant_id: TenantId, user_id: UserId) -> Self {
        Self { tenant_id, user_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
