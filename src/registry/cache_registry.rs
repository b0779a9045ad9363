//! # Cache Registry
//!
//! Descriptors for every tenant cache type: how to construct an instance and whether
//! instances are leased per thread or shared by all threads of a tenant.

use crate::error::{Result, TenancyError};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// How instances of a cache type are handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingMode {
    /// Each unit of work gets its own instance; idle instances are pooled per tenant
    PerThread,
    /// One instance per tenant seen by every thread. Must be safe for concurrent use.
    Shared,
}

impl fmt::Display for SharingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharingMode::PerThread => write!(f, "per_thread"),
            SharingMode::Shared => write!(f, "shared"),
        }
    }
}

/// Lifecycle hooks for cache objects.
///
/// Hooks always run outside of tenant locks. A failing `on_checkout` or `on_checkin`
/// causes the instance to be discarded instead of pooled. Hooks are only invoked on
/// per-thread instances; shared instances are never checked out or in.
pub trait TenantCache: Send + Sync + 'static {
    /// Called each time the instance is leased to a unit of work
    fn on_checkout(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called at the end of the unit of work, before the instance may be pooled again
    fn on_checkin(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the current unit of work invalidates the cache type it holds
    fn on_invalidated(&mut self) {}

    /// Number of entries held, for diagnostics
    fn approximate_len(&self) -> Option<usize> {
        None
    }
}

impl<K, V> TenantCache for HashMap<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn approximate_len(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<K, V> TenantCache for BTreeMap<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn approximate_len(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<T: Send + Sync + 'static> TenantCache for Vec<T> {
    fn approximate_len(&self) -> Option<usize> {
        Some(self.len())
    }
}

/// Type-erased cache object as stored in tenant slots
pub(crate) trait AnyCache: TenantCache {
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: TenantCache> AnyCache for T {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

type CacheFactory = Arc<dyn Fn() -> Box<dyn AnyCache> + Send + Sync>;

/// Descriptor for one registered cache type
#[derive(Clone)]
pub struct CacheType {
    description: String,
    mode: SharingMode,
    factory: CacheFactory,
}

impl CacheType {
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn mode(&self) -> SharingMode {
        self.mode
    }

    pub(crate) fn create(&self) -> Box<dyn AnyCache> {
        (self.factory)()
    }
}

impl fmt::Debug for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheType")
            .field("description", &self.description)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Stable, typed handle to a registered cache type
pub struct CacheHandle<T> {
    index: usize,
    registry_id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CacheHandle<T> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for CacheHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CacheHandle<T> {}

impl<T> fmt::Debug for CacheHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle")
            .field("index", &self.index)
            .field("registry_id", &self.registry_id)
            .finish()
    }
}

/// Append-only list of cache types, sealed before work is served
pub struct CacheRegistry {
    id: u64,
    types: Vec<CacheType>,
    sealed: bool,
    allow_replacement: bool,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            types: Vec::new(),
            sealed: false,
            allow_replacement: false,
        }
    }

    /// Re-registering a description replaces the earlier descriptor and keeps its handle.
    /// Used when code is reloaded during development.
    pub fn allow_replacement(mut self, allow: bool) -> Self {
        self.allow_replacement = allow;
        self
    }

    /// Register a cache type, returning its handle
    pub fn register<T, F>(
        &mut self,
        description: &str,
        mode: SharingMode,
        factory: F,
    ) -> Result<CacheHandle<T>>
    where
        T: TenantCache,
        F: Fn() -> T + Send + Sync + 'static,
    {
        if self.sealed {
            return Err(TenancyError::RegistrySealed {
                description: description.to_string(),
            });
        }

        let cache_type = CacheType {
            description: description.to_string(),
            mode,
            factory: Arc::new(move || Box::new(factory()) as Box<dyn AnyCache>),
        };

        let existing = self
            .types
            .iter()
            .position(|t| t.description == description);
        let index = match existing {
            Some(index) if self.allow_replacement => {
                warn!(cache = %description, index, "🗃️ CACHE: Replacing registered cache type");
                self.types[index] = cache_type;
                index
            }
            Some(_) => {
                return Err(TenancyError::DuplicateCacheType {
                    description: description.to_string(),
                })
            }
            None => {
                self.types.push(cache_type);
                self.types.len() - 1
            }
        };

        debug!(cache = %description, index, mode = %mode, "🗃️ CACHE: Registered cache type");

        Ok(CacheHandle {
            index,
            registry_id: self.id,
            _marker: PhantomData,
        })
    }

    /// Stop accepting registrations
    pub fn seal(&mut self) {
        if !self.sealed {
            info!(cache_types = self.types.len(), "🗃️ CACHE: Registry sealed");
        }
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CacheType> {
        self.types.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheType> {
        self.types.iter()
    }

    /// Look up the descriptor for a handle, rejecting handles from other registries
    pub fn resolve<T>(&self, handle: &CacheHandle<T>) -> Result<&CacheType> {
        if handle.registry_id != self.id {
            return Err(TenancyError::ForeignCacheHandle {
                index: handle.index,
            });
        }
        self.types
            .get(handle.index)
            .ok_or(TenancyError::InvalidCacheHandle {
                index: handle.index,
            })
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("types", &self.types)
            .field("sealed", &self.sealed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_assigns_sequential_handles() {
        let mut registry = CacheRegistry::new();
        let a = registry
            .register("Labels", SharingMode::PerThread, HashMap::<u32, String>::new)
            .unwrap();
        let b = registry
            .register("Schema", SharingMode::Shared, Vec::<String>::new)
            .unwrap();

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.resolve(&b).unwrap().mode(), SharingMode::Shared);
        assert_eq!(registry.resolve(&a).unwrap().description(), "Labels");
    }

    #[test]
    fn test_sealed_registry_rejects_registration() {
        let mut registry = CacheRegistry::new();
        registry.seal();
        let result = registry.register("Late", SharingMode::PerThread, Vec::<u8>::new);
        assert!(matches!(result, Err(TenancyError::RegistrySealed { .. })));
    }

    #[test]
    fn test_duplicate_descriptions() {
        let mut registry = CacheRegistry::new();
        registry
            .register("Labels", SharingMode::PerThread, Vec::<u8>::new)
            .unwrap();
        assert!(matches!(
            registry.register("Labels", SharingMode::PerThread, Vec::<u8>::new),
            Err(TenancyError::DuplicateCacheType { .. })
        ));

        let mut reloading = CacheRegistry::new().allow_replacement(true);
        let first = reloading
            .register("Labels", SharingMode::PerThread, Vec::<u8>::new)
            .unwrap();
        let second = reloading
            .register("Labels", SharingMode::Shared, Vec::<u8>::new)
            .unwrap();
        assert_eq!(first.index(), second.index());
        assert_eq!(reloading.len(), 1);
        assert_eq!(reloading.resolve(&second).unwrap().mode(), SharingMode::Shared);
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut one = CacheRegistry::new();
        let mut two = CacheRegistry::new();
        let handle = one
            .register("Labels", SharingMode::PerThread, Vec::<u8>::new)
            .unwrap();
        two.register("Labels", SharingMode::PerThread, Vec::<u8>::new)
            .unwrap();

        assert!(matches!(
            two.resolve(&handle),
            Err(TenancyError::ForeignCacheHandle { index: 0 })
        ));
    }

    #[test]
    fn test_factory_creates_fresh_instances() {
        let mut registry = CacheRegistry::new();
        let handle = registry
            .register("Numbers", SharingMode::PerThread, || vec![1u32, 2, 3])
            .unwrap();
        let created = registry.resolve(&handle).unwrap().create();
        assert_eq!(created.approximate_len(), Some(3));
    }
}
