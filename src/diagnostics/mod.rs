//! # Diagnostics
//!
//! Operational dumps of pool occupancy and per-tenant cache slots. Reports are plain data:
//! render them with `Display` for a terminal or serialize them with `serde_json`.

pub mod cache_diagnostics;
pub mod pool_diagnostics;

pub use cache_diagnostics::{CacheSlotReport, TenantCacheReport};
pub use pool_diagnostics::{
    ConnectionState, ConnectionStateEntry, ConnectionSummary, PoolReport, RecentEntry,
};

use serde::Serialize;
use std::fmt;

/// Pool report plus the cache report of every tenant with state
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeReport {
    pub pool: PoolReport,
    pub tenants: Vec<TenantCacheReport>,
}

impl RuntimeReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RuntimeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===============================================================")?;
        write!(f, "{}", self.pool)?;
        writeln!(f, "TENANT CACHES")?;
        for tenant in &self.tenants {
            write!(f, "{tenant}")?;
        }
        writeln!(f, "===============================================================")
    }
}
