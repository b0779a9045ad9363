//! Per-tenant state: cache slots, serial numbers and counters.
//!
//! A [`TenantState`] is created the first time a tenant needs one and is never destroyed.
//! Its slot vector is sized from the sealed cache registry, one [`CacheSlot`] per
//! registered cache type.

use crate::error::{Result, TenancyError};
use crate::registry::AnyCache;
use crate::tenant::TenantHandle;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Pooled instances and the invalidation serial for one cache type of one tenant
pub(crate) struct CacheSlot {
    /// Per-thread instances ready for reuse
    pub(crate) pooled: Vec<Box<dyn AnyCache>>,
    /// The single instance of a shared cache type
    pub(crate) shared: Option<Arc<dyn AnyCache>>,
    /// Bumped on every invalidation; instances leased under an older serial are never re-pooled
    pub(crate) serial: u64,
}

impl CacheSlot {
    fn new() -> Self {
        Self {
            pooled: Vec::new(),
            shared: None,
            serial: 0,
        }
    }

    /// Drop everything pooled and move to the next serial
    pub(crate) fn invalidate(&mut self) -> u64 {
        self.pooled.clear();
        self.shared = None;
        self.serial += 1;
        self.serial
    }

    pub(crate) fn snapshot(&self) -> CacheSlotSnapshot {
        let mut object_lengths: Vec<Option<usize>> =
            self.pooled.iter().map(|c| c.approximate_len()).collect();
        if let Some(shared) = &self.shared {
            object_lengths.push(shared.approximate_len());
        }
        CacheSlotSnapshot {
            pooled: self.pooled.len(),
            shared_present: self.shared.is_some(),
            serial: self.serial,
            object_lengths,
        }
    }
}

/// Point-in-time view of a cache slot, excluding checked-out instances
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSlotSnapshot {
    pub pooled: usize,
    pub shared_present: bool,
    pub serial: u64,
    pub object_lengths: Vec<Option<usize>>,
}

/// Named counters kept per tenant, e.g. for usage accounting
#[derive(Debug, Clone, Default)]
pub struct TenantCounters {
    values: BTreeMap<String, i64>,
}

impl TenantCounters {
    /// Add `by` to the named counter, returning the new value
    pub fn increment(&mut self, name: &str, by: i64) -> i64 {
        let value = self.values.entry(name.to_string()).or_insert(0);
        *value += by;
        *value
    }

    pub fn get(&self, name: &str) -> i64 {
        self.values.get(name).copied().unwrap_or(0)
    }

    pub fn reset(&mut self, name: &str) -> i64 {
        self.values.remove(name).unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.values.clone()
    }
}

/// Long-lived state for one tenant
pub struct TenantState {
    tenant_id: u32,
    slots: Mutex<Vec<CacheSlot>>,
    counters: Mutex<TenantCounters>,
}

impl TenantState {
    fn new(tenant_id: u32, slot_count: usize) -> Self {
        Self {
            tenant_id,
            slots: Mutex::new((0..slot_count).map(|_| CacheSlot::new()).collect()),
            counters: Mutex::new(TenantCounters::default()),
        }
    }

    pub fn tenant(&self) -> TenantHandle {
        TenantHandle::Tenant(self.tenant_id)
    }

    /// Lock the cache slots. Callers must not run cache lifecycle hooks while holding this.
    pub(crate) fn lock_slots(&self) -> MutexGuard<'_, Vec<CacheSlot>> {
        self.slots.lock()
    }

    /// Current serial of a cache slot
    pub fn serial(&self, cache_index: usize) -> Option<u64> {
        self.slots.lock().get(cache_index).map(|slot| slot.serial)
    }

    /// Number of idle instances waiting in a cache slot
    pub fn pooled_count(&self, cache_index: usize) -> Option<usize> {
        self.slots.lock().get(cache_index).map(|slot| slot.pooled.len())
    }

    pub fn slot_snapshot(&self, cache_index: usize) -> Option<CacheSlotSnapshot> {
        self.slots.lock().get(cache_index).map(CacheSlot::snapshot)
    }

    pub(crate) fn slot_snapshots(&self) -> Vec<CacheSlotSnapshot> {
        self.slots.lock().iter().map(CacheSlot::snapshot).collect()
    }

    /// Invalidate one cache slot, returning the new serial
    pub(crate) fn invalidate_slot(&self, cache_index: usize) -> Result<u64> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(cache_index)
            .ok_or(TenancyError::InvalidCacheHandle { index: cache_index })?;
        Ok(slot.invalidate())
    }

    /// Invalidate every cache slot of this tenant
    pub fn invalidate_all(&self) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            slot.invalidate();
        }
    }

    /// Run `f` with exclusive access to this tenant's counters
    pub fn with_counters<R>(&self, f: impl FnOnce(&mut TenantCounters) -> R) -> R {
        let mut counters = self.counters.lock();
        f(&mut counters)
    }
}

impl std::fmt::Debug for TenantState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantState")
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

/// All tenant states known to this process
pub struct TenantStates {
    states: DashMap<u32, Arc<TenantState>>,
    creation_lock: Mutex<()>,
    slot_count: usize,
}

impl TenantStates {
    pub fn new(slot_count: usize) -> Self {
        Self {
            states: DashMap::new(),
            creation_lock: Mutex::new(()),
            slot_count,
        }
    }

    /// Existing state for a tenant, without creating one
    pub fn get(&self, tenant: TenantHandle) -> Option<Arc<TenantState>> {
        let id = tenant.id()?;
        self.states.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// State for a tenant, created on first use
    pub fn get_or_create(&self, tenant: TenantHandle) -> Result<Arc<TenantState>> {
        let id = tenant.id().ok_or(TenancyError::NoTenantState)?;
        if let Some(state) = self.states.get(&id) {
            return Ok(Arc::clone(state.value()));
        }

        let _creating = self.creation_lock.lock();
        // Check again inside the lock, another thread may have won
        if let Some(state) = self.states.get(&id) {
            return Ok(Arc::clone(state.value()));
        }
        let state = Arc::new(TenantState::new(id, self.slot_count));
        self.states.insert(id, Arc::clone(&state));
        debug!(tenant = id, slots = self.slot_count, "🏢 TENANT: Created tenant state");
        Ok(state)
    }

    /// Tenants which have state, in ascending order
    pub fn tenants(&self) -> Vec<TenantHandle> {
        let mut ids: Vec<u32> = self.states.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids.into_iter().map(TenantHandle::Tenant).collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
