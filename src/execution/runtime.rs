//! # Tenancy Runtime
//!
//! The process-wide object that owns the sealed cache registry, every tenant's state and
//! the connection pool. Build one at startup and pass it by reference to whatever serves
//! units of work; tests can build as many as they like.

use crate::config::TenancyConfig;
use crate::database::{TenantAwarePool, TenantConnector};
use crate::diagnostics::{RuntimeReport, TenantCacheReport};
use crate::error::{Result, TenancyError};
use crate::execution::context::{bind_current, current_binding, ExecutionContext};
use crate::execution::directory::TenantDirectory;
use crate::logging::log_tenant_operation;
use crate::registry::{CacheHandle, CacheRegistry, SharingMode, TenantCache};
use crate::tenant::{TenantHandle, TenantState, TenantStates};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

pub struct RuntimeBuilder<C: TenantConnector> {
    connector: Arc<C>,
    config: TenancyConfig,
    caches: CacheRegistry,
    directory: Option<Arc<dyn TenantDirectory>>,
}

impl<C: TenantConnector> RuntimeBuilder<C> {
    pub fn new(connector: C) -> Self {
        Self::with_shared_connector(Arc::new(connector))
    }

    pub fn with_shared_connector(connector: Arc<C>) -> Self {
        Self {
            connector,
            config: TenancyConfig::default(),
            caches: CacheRegistry::new(),
            directory: None,
        }
    }

    pub fn config(mut self, config: TenancyConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a registry prepared elsewhere, e.g. one allowing replacement during development
    pub fn cache_registry(mut self, caches: CacheRegistry) -> Self {
        self.caches = caches;
        self
    }

    pub fn directory(mut self, directory: impl TenantDirectory + 'static) -> Self {
        self.directory = Some(Arc::new(directory));
        self
    }

    /// Register a cache type. Only possible before [`build`](Self::build) seals the registry.
    pub fn register_cache<T, F>(
        &mut self,
        description: &str,
        mode: SharingMode,
        factory: F,
    ) -> Result<CacheHandle<T>>
    where
        T: TenantCache,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.caches.register(description, mode, factory)
    }

    /// Validate configuration, seal the cache registry and create the pool
    pub fn build(self) -> Result<Runtime<C>> {
        self.config.validate()?;

        let mut caches = self.caches;
        caches.seal();

        let id = NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed);
        let pool = TenantAwarePool::with_shared_connector(self.connector, self.config.pool.clone());
        info!(
            runtime_id = id,
            cache_types = caches.len(),
            pool_id = pool.id(),
            has_directory = self.directory.is_some(),
            "🏢 TENANT: Tenancy runtime ready"
        );

        Ok(Runtime {
            id,
            tenants: TenantStates::new(caches.len()),
            caches,
            pool,
            directory: self.directory,
            config: self.config,
        })
    }
}

#[cfg(feature = "postgres")]
impl RuntimeBuilder<crate::database::PgTenantConnector> {
    /// Builder with a PostgreSQL connector made from `config.database`
    pub fn postgres(config: TenancyConfig) -> Result<Self> {
        let connector = crate::database::PgTenantConnector::new(config.database.clone())?;
        Ok(Self::new(connector).config(config))
    }
}

/// Owner of the pool, the cache registry and all tenant state
pub struct Runtime<C: TenantConnector> {
    id: u64,
    config: TenancyConfig,
    caches: CacheRegistry,
    tenants: TenantStates,
    pool: TenantAwarePool<C>,
    directory: Option<Arc<dyn TenantDirectory>>,
}

impl<C: TenantConnector> Runtime<C> {
    pub fn builder(connector: C) -> RuntimeBuilder<C> {
        RuntimeBuilder::new(connector)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    pub fn caches(&self) -> &CacheRegistry {
        &self.caches
    }

    pub fn pool(&self) -> &TenantAwarePool<C> {
        &self.pool
    }

    pub fn tenant_states(&self) -> &TenantStates {
        &self.tenants
    }

    /// State for a tenant if it has been created
    pub fn tenant_state(&self, tenant: TenantHandle) -> Option<Arc<TenantState>> {
        self.tenants.get(tenant)
    }

    /// Start a unit of work for `tenant` on this thread.
    ///
    /// Fails with [`TenancyError::AlreadyInTenantContext`] if this thread is already
    /// running one.
    pub fn begin(&self, tenant: TenantHandle) -> Result<ExecutionContext<'_, C>> {
        bind_current(self.id, tenant)?;
        log_tenant_operation("enter", tenant, None);
        Ok(ExecutionContext::new(self, tenant))
    }

    /// Run `work` as a unit of work for `tenant`.
    ///
    /// Teardown runs whether `work` succeeds, returns an error, or panics. An error or
    /// panic aborts the connection's unfinished work before it goes back to the pool.
    pub fn enter<T, E, F>(&self, tenant: TenantHandle, work: F) -> std::result::Result<T, E>
    where
        E: From<TenancyError>,
        F: FnOnce(&mut ExecutionContext<'_, C>) -> std::result::Result<T, E>,
    {
        let mut context = self.begin(tenant)?;
        match work(&mut context) {
            Ok(value) => {
                context.finish();
                Ok(value)
            }
            Err(err) => {
                context.mark_failed();
                context.finish();
                Err(err)
            }
        }
    }

    /// Run `work` once for every tenant in the directory, each in its own unit of work.
    ///
    /// Stops at the first failing tenant.
    pub fn for_each_tenant<E, F>(&self, work: F) -> std::result::Result<(), E>
    where
        E: From<TenancyError>,
        F: FnMut(&mut ExecutionContext<'_, C>) -> std::result::Result<(), E>,
    {
        let directory = self
            .directory
            .as_ref()
            .ok_or(TenancyError::NoTenantDirectory)?;
        let tenants = directory
            .tenants()
            .map_err(|source| TenancyError::TenantDirectory { source })?;
        self.for_each_tenant_in(tenants, work)
    }

    /// Like [`for_each_tenant`](Self::for_each_tenant) over an explicit list
    pub fn for_each_tenant_in<E, F, I>(&self, tenants: I, mut work: F) -> std::result::Result<(), E>
    where
        E: From<TenancyError>,
        F: FnMut(&mut ExecutionContext<'_, C>) -> std::result::Result<(), E>,
        I: IntoIterator<Item = TenantHandle>,
    {
        for tenant in tenants {
            debug!(tenant = %tenant, "🏢 TENANT: Running work for tenant");
            self.enter(tenant, &mut work)?;
        }
        Ok(())
    }

    /// The tenant of the unit of work running on this thread, if any
    pub fn current_tenant(&self) -> Option<TenantHandle> {
        current_binding()
            .filter(|(runtime_id, _)| *runtime_id == self.id)
            .map(|(_, tenant)| tenant)
    }

    /// Like [`current_tenant`](Self::current_tenant), failing when no unit of work is running
    pub fn require_current_tenant(&self) -> Result<TenantHandle> {
        self.current_tenant().ok_or(TenancyError::NoTenantSelected)
    }

    /// Invalidate every cache of `tenant`. Callable from any thread, inside or outside a
    /// unit of work; a no-op for tenants without state.
    pub fn clear_all_caches_for_tenant(&self, tenant: TenantHandle) {
        if let Some(state) = self.tenants.get(tenant) {
            state.invalidate_all();
            info!(tenant = %tenant, "🗃️ CACHE: Cleared all caches for tenant");
        }
    }

    pub fn cache_report(&self, tenant: TenantHandle) -> Option<TenantCacheReport> {
        self.tenants
            .get(tenant)
            .map(|state| TenantCacheReport::capture(&state, &self.caches))
    }

    /// Pool occupancy plus the cache slots of every tenant with state
    pub fn report(&self) -> RuntimeReport {
        let tenants = self
            .tenants
            .tenants()
            .into_iter()
            .filter_map(|tenant| self.cache_report(tenant))
            .collect();
        RuntimeReport {
            pool: self.pool.report(),
            tenants,
        }
    }
}

impl<C: TenantConnector> std::fmt::Debug for Runtime<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id)
            .field("caches", &self.caches)
            .field("tenants", &self.tenants.len())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
