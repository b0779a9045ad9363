//! Source of the tenants known to the host application.

use crate::tenant::TenantHandle;

/// Enumerates tenants for bulk iteration.
///
/// Each call returns a point-in-time snapshot; tenants added while an iteration is running
/// are picked up by the next one.
pub trait TenantDirectory: Send + Sync {
    fn tenants(&self) -> anyhow::Result<Vec<TenantHandle>>;
}

impl<F> TenantDirectory for F
where
    F: Fn() -> anyhow::Result<Vec<TenantHandle>> + Send + Sync,
{
    fn tenants(&self) -> anyhow::Result<Vec<TenantHandle>> {
        self()
    }
}
