//! Per-tenant cache slot dumps.

use crate::registry::{CacheRegistry, SharingMode};
use crate::tenant::{TenantHandle, TenantState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct CacheSlotReport {
    pub description: String,
    pub mode: SharingMode,
    pub pooled: usize,
    pub shared_present: bool,
    pub serial: u64,
    /// Entry counts of idle instances, where the cache type reports one
    pub object_lengths: Vec<Option<usize>>,
}

/// Cache slots and counters of one tenant. Checked-out instances are not counted.
#[derive(Debug, Clone, Serialize)]
pub struct TenantCacheReport {
    pub tenant: TenantHandle,
    pub slots: Vec<CacheSlotReport>,
    pub counters: BTreeMap<String, i64>,
}

impl TenantCacheReport {
    pub fn capture(state: &TenantState, registry: &CacheRegistry) -> Self {
        let slots = state
            .slot_snapshots()
            .into_iter()
            .zip(registry.iter())
            .map(|(snapshot, cache_type)| CacheSlotReport {
                description: cache_type.description().to_string(),
                mode: cache_type.mode(),
                pooled: snapshot.pooled,
                shared_present: snapshot.shared_present,
                serial: snapshot.serial,
                object_lengths: snapshot.object_lengths,
            })
            .collect();
        Self {
            tenant: state.tenant(),
            slots,
            counters: state.with_counters(|c| c.snapshot()),
        }
    }

    pub fn total_pooled(&self) -> usize {
        self.slots.iter().map(|s| s.pooled).sum()
    }

    pub fn slot(&self, description: &str) -> Option<&CacheSlotReport> {
        self.slots.iter().find(|s| s.description == description)
    }
}

impl fmt::Display for TenantCacheReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TENANT {} (checked out instances not counted)", self.tenant)?;
        for slot in &self.slots {
            let lengths: Vec<String> = slot
                .object_lengths
                .iter()
                .map(|len| len.map_or_else(|| "?".to_string(), |n| n.to_string()))
                .collect();
            writeln!(
                f,
                "  {:<32} {:<10} serial={:<4} pooled={:<3} shared={} lengths=[{}]",
                slot.description,
                slot.mode.to_string(),
                slot.serial,
                slot.pooled,
                if slot.shared_present { "yes" } else { "no" },
                lengths.join(",")
            )?;
        }
        for (name, value) in &self.counters {
            writeln!(f, "  counter {name} = {value}")?;
        }
        Ok(())
    }
}
