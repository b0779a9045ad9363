//! # Tenants
//!
//! Tenant identity and the long-lived per-tenant state that backs cache checkout.
//!
//! - [`TenantHandle`] - opaque tenant identifier, or the "no tenant" sentinel
//! - [`TenantState`] - one per tenant, created lazily and kept for the process lifetime
//! - [`TenantStates`] - the map of all tenant states, with double-checked creation

pub mod state;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use state::{CacheSlotSnapshot, TenantCounters, TenantState, TenantStates};

/// Identifies the tenant a unit of work runs for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantHandle {
    /// Work that is not scoped to any tenant, e.g. reading the tenant directory
    NoTenant,
    Tenant(u32),
}

impl TenantHandle {
    pub fn id(&self) -> Option<u32> {
        match self {
            TenantHandle::Tenant(id) => Some(*id),
            TenantHandle::NoTenant => None,
        }
    }

    pub fn is_tenant(&self) -> bool {
        matches!(self, TenantHandle::Tenant(_))
    }
}

impl From<u32> for TenantHandle {
    fn from(id: u32) -> Self {
        TenantHandle::Tenant(id)
    }
}

impl fmt::Display for TenantHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantHandle::Tenant(id) => write!(f, "{id}"),
            TenantHandle::NoTenant => write!(f, "no_tenant"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_basics() {
        let t: TenantHandle = 12.into();
        assert_eq!(t, TenantHandle::Tenant(12));
        assert_eq!(t.id(), Some(12));
        assert!(t.is_tenant());
        assert_eq!(TenantHandle::NoTenant.id(), None);
        assert_eq!(TenantHandle::NoTenant.to_string(), "no_tenant");
        assert!(TenantHandle::NoTenant < TenantHandle::Tenant(0));
    }

    #[test]
    fn test_handle_serialization() {
        let json = serde_json::to_string(&TenantHandle::Tenant(3)).unwrap();
        assert_eq!(json, r#"{"tenant":3}"#);
        let json = serde_json::to_string(&TenantHandle::NoTenant).unwrap();
        assert_eq!(json, r#""no_tenant""#);
    }
}
