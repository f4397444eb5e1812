//! Ambient tenant session.
//!
//! Scheduling operations are implicitly scoped to the tenant carried by the
//! session. Callers switch tenants with [`Session::set_tenant_id`]; service
//! code reads the current tenant at the start of each operation and never
//! caches it across calls.

use crate::id::TenantId;
use std::sync::RwLock;

/// Carrier for the tenant all scheduling operations are scoped to.
#[derive(Debug)]
pub struct Session {
    tenant: RwLock<TenantId>,
}

impl Session {
    /// Creates a session scoped to the given tenant.
    #[must_use]
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant: RwLock::new(tenant_id),
        }
    }

    /// Returns the tenant the session is currently scoped to.
    #[must_use]
    pub fn tenant_id(&self) -> TenantId {
        *self.tenant.read().expect("tenant lock poisoned")
    }

    /// Rescopes the session to another tenant.
    pub fn set_tenant_id(&self, tenant_id: TenantId) {
        *self.tenant.write().expect("tenant lock poisoned") = tenant_id;
    }
}
