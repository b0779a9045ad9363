//! # Cache Checkout Table
//!
//! Holds the cache instances leased to one unit of work, together with the slot serial
//! each was leased under. The table lives inside an
//! [`ExecutionContext`](crate::execution::ExecutionContext) and is emptied when the unit
//! of work ends.

use crate::error::{LifecyclePhase, Result, TenancyError};
use crate::logging::{log_cache_operation, log_error};
use crate::registry::{AnyCache, CacheHandle, CacheRegistry, CacheType, SharingMode, TenantCache};
use crate::tenant::TenantState;
use std::any::Any;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info};

/// A leased per-thread instance and the serial it was leased under
struct CacheCheckout {
    instance: Box<dyn AnyCache>,
    serial_at_checkout: u64,
}

/// Access to a checked-out cache
pub enum CacheRef<'a, T> {
    /// Per-thread instance, exclusively owned by this unit of work until checkin
    Leased(&'a mut T),
    /// The tenant's shared instance
    Shared(Arc<T>),
}

impl<T> CacheRef<'_, T> {
    /// Mutable access, only available for per-thread instances
    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            CacheRef::Leased(cache) => Some(&mut **cache),
            CacheRef::Shared(_) => None,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, CacheRef::Shared(_))
    }
}

impl<T> Deref for CacheRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            CacheRef::Leased(cache) => cache,
            CacheRef::Shared(cache) => cache,
        }
    }
}

/// Outcome of returning every leased cache at the end of a unit of work
#[derive(Debug, Default)]
pub struct CheckinReport {
    /// Instances pushed back into their tenant slot
    pub returned: usize,
    /// Instances dropped because their slot was invalidated while they were leased
    pub discarded_stale: usize,
    /// Instances whose checkin hook failed; they were dropped
    pub failures: Vec<TenancyError>,
}

impl CheckinReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Cache instances leased to the current unit of work, indexed by cache handle
#[derive(Default)]
pub struct CacheCheckoutTable {
    entries: Vec<Option<CacheCheckout>>,
}

impl CacheCheckoutTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cache types currently leased
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn holds(&self, cache_index: usize) -> bool {
        matches!(self.entries.get(cache_index), Some(Some(_)))
    }

    /// Serial recorded when the cache at `cache_index` was leased
    pub fn serial_at_checkout(&self, cache_index: usize) -> Option<u64> {
        self.entries
            .get(cache_index)
            .and_then(Option::as_ref)
            .map(|checkout| checkout.serial_at_checkout)
    }

    /// Check out a cache for the tenant owning `state`.
    ///
    /// Repeated calls within one unit of work return the same per-thread instance.
    pub fn checkout<'a, T: TenantCache>(
        &'a mut self,
        state: &TenantState,
        registry: &CacheRegistry,
        handle: &CacheHandle<T>,
    ) -> Result<CacheRef<'a, T>> {
        let cache_type = registry.resolve(handle)?;
        let index = handle.index();

        if cache_type.mode() == SharingMode::Shared {
            let shared = {
                let mut slots = state.lock_slots();
                let slot = slots
                    .get_mut(index)
                    .ok_or(TenancyError::InvalidCacheHandle { index })?;
                Arc::clone(
                    slot.shared
                        .get_or_insert_with(|| Arc::from(cache_type.create())),
                )
            };
            let shared = shared
                .into_any_arc()
                .downcast::<T>()
                .map_err(|_| type_mismatch(cache_type))?;
            return Ok(CacheRef::Shared(shared));
        }

        if !self.holds(index) {
            self.lease(state, cache_type, index)?;
        }

        let checkout = self
            .entries
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or_else(|| TenancyError::invariant("cache checkout missing after lease"))?;
        let cache = checkout
            .instance
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| type_mismatch(cache_type))?;
        Ok(CacheRef::Leased(cache))
    }

    /// The already-leased instance for `handle`, without checking one out
    pub fn if_checked_out<T: TenantCache>(
        &mut self,
        registry: &CacheRegistry,
        handle: &CacheHandle<T>,
    ) -> Result<Option<&mut T>> {
        let cache_type = registry.resolve(handle)?;
        match self.entries.get_mut(handle.index()).and_then(Option::as_mut) {
            Some(checkout) => checkout
                .instance
                .as_any_mut()
                .downcast_mut::<T>()
                .map(Some)
                .ok_or_else(|| type_mismatch(cache_type)),
            None => Ok(None),
        }
    }

    /// Invalidate a cache type for the tenant owning `state`, returning the new serial.
    ///
    /// Pooled instances are dropped immediately. An instance leased by this table is told
    /// through `on_invalidated` and dropped; instances leased elsewhere are rejected when
    /// they are checked in.
    pub fn invalidate<T: TenantCache>(
        &mut self,
        state: &TenantState,
        registry: &CacheRegistry,
        handle: &CacheHandle<T>,
    ) -> Result<u64> {
        let cache_type = registry.resolve(handle)?;
        let index = handle.index();

        info!(
            tenant = %state.tenant(),
            cache = %cache_type.description(),
            "🗃️ CACHE: Invalidating cache '{}'",
            cache_type.description()
        );
        let serial = state.invalidate_slot(index)?;

        if let Some(mut checkout) = self.entries.get_mut(index).and_then(Option::take) {
            checkout.instance.on_invalidated();
        }

        log_cache_operation(
            "invalidate",
            state.tenant(),
            cache_type.description(),
            Some(serial),
            "invalidated",
        );
        Ok(serial)
    }

    /// Return every leased cache to the tenant owning `state`.
    ///
    /// The table is emptied before any hook runs, so a failing hook never leaves a lease
    /// behind for the next unit of work. A panicking hook counts as a failed one.
    pub fn checkin_all(&mut self, state: &TenantState, registry: &CacheRegistry) -> CheckinReport {
        let checkouts = std::mem::take(&mut self.entries);
        let tenant = state.tenant();
        let mut report = CheckinReport::default();

        // Notify caches outside the lock, before they may be reused
        let mut survivors = Vec::new();
        for (index, entry) in checkouts.into_iter().enumerate() {
            let Some(mut checkout) = entry else {
                continue;
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| checkout.instance.on_checkin()))
                .unwrap_or_else(|payload| {
                    Err(anyhow::anyhow!("on_checkin panicked: {}", panic_message(&*payload)))
                });
            match outcome {
                Ok(()) => survivors.push((index, checkout)),
                Err(source) => {
                    let err =
                        TenancyError::lifecycle(describe(registry, index), LifecyclePhase::Checkin, source);
                    log_error("cache", "checkin", &err, Some(&tenant.to_string()));
                    report.failures.push(err);
                }
            }
        }

        if !survivors.is_empty() {
            let mut slots = state.lock_slots();
            for (index, checkout) in survivors {
                match slots.get_mut(index) {
                    Some(slot) if slot.serial == checkout.serial_at_checkout => {
                        slot.pooled.push(checkout.instance);
                        report.returned += 1;
                    }
                    _ => report.discarded_stale += 1,
                }
            }
        }

        debug!(
            tenant = %tenant,
            returned = report.returned,
            discarded_stale = report.discarded_stale,
            failed = report.failures.len(),
            "🗃️ CACHE: Checked in caches"
        );
        report
    }

    /// Take an instance from the tenant's pool, or build one, and record it as leased
    fn lease(&mut self, state: &TenantState, cache_type: &CacheType, index: usize) -> Result<()> {
        let (pooled, serial) = {
            let mut slots = state.lock_slots();
            let slot = slots
                .get_mut(index)
                .ok_or(TenancyError::InvalidCacheHandle { index })?;
            (slot.pooled.pop(), slot.serial)
        };

        // A serial read before construction can only be older, never newer, so a
        // concurrent invalidation still prevents this instance from being re-pooled
        let reused = pooled.is_some();
        let mut instance = match pooled {
            Some(instance) => instance,
            None => cache_type.create(),
        };

        if let Err(source) = instance.on_checkout() {
            let err = TenancyError::lifecycle(
                cache_type.description(),
                LifecyclePhase::Checkout,
                source,
            );
            log_error("cache", "checkout", &err, Some(&state.tenant().to_string()));
            return Err(err);
        }

        if self.entries.len() <= index {
            self.entries.resize_with(index + 1, || None);
        }
        self.entries[index] = Some(CacheCheckout {
            instance,
            serial_at_checkout: serial,
        });

        log_cache_operation(
            "checkout",
            state.tenant(),
            cache_type.description(),
            Some(serial),
            if reused { "reused" } else { "created" },
        );
        Ok(())
    }
}

impl std::fmt::Debug for CacheCheckoutTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let held: Vec<(usize, u64)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.as_ref().map(|c| (index, c.serial_at_checkout)))
            .collect();
        f.debug_struct("CacheCheckoutTable").field("held", &held).finish()
    }
}

fn describe(registry: &CacheRegistry, index: usize) -> String {
    registry
        .get(index)
        .map(|cache_type| cache_type.description().to_string())
        .unwrap_or_else(|| format!("cache #{index}"))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn type_mismatch(cache_type: &CacheType) -> TenancyError {
    TenancyError::invariant(format!(
        "cache '{}' holds an instance of an unexpected type",
        cache_type.description()
    ))
}
