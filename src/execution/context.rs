//! # Execution Context
//!
//! Scope guard for one unit of work on one thread. While it lives, its tenant is the
//! thread's current tenant; dropping it (or calling [`ExecutionContext::finish`]) returns
//! every leased cache and the connection, on every exit path including panics.

use crate::cache::{CacheCheckoutTable, CacheRef, CheckinReport};
use crate::database::{ConnectionInfo, TenantConnector};
use crate::error::{Result, TenancyError};
use crate::execution::runtime::Runtime;
use crate::logging::{log_error, log_tenant_operation};
use crate::registry::{CacheHandle, TenantCache};
use crate::tenant::{TenantCounters, TenantHandle, TenantState};
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

thread_local! {
    /// Runtime id and tenant of the unit of work running on this thread
    static CURRENT: Cell<Option<(u64, TenantHandle)>> = const { Cell::new(None) };
}

/// Bind `tenant` to this thread, failing if another unit of work is already bound
pub(crate) fn bind_current(runtime_id: u64, tenant: TenantHandle) -> Result<()> {
    CURRENT.with(|current| match current.get() {
        Some((_, active)) => Err(TenancyError::AlreadyInTenantContext { current: active }),
        None => {
            current.set(Some((runtime_id, tenant)));
            Ok(())
        }
    })
}

pub(crate) fn current_binding() -> Option<(u64, TenantHandle)> {
    CURRENT.with(Cell::get)
}

fn clear_current() {
    CURRENT.with(|current| current.set(None));
}

/// What happened to the unit of work's connection during teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionOutcome {
    #[default]
    NotHeld,
    Released,
    /// The unit of work failed; unfinished work was aborted before release
    AbortedAndReleased,
    /// Aborting failed, so the connection was dropped instead of pooled
    Discarded,
}

/// Everything teardown did, including failures it isolated
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub caches: CheckinReport,
    pub connection: ConnectionOutcome,
    pub errors: Vec<TenancyError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.caches.is_clean() && self.errors.is_empty()
    }
}

/// One unit of work for one tenant.
///
/// Not `Send`: the thread-local tenant binding is cleared on the thread that created it.
pub struct ExecutionContext<'rt, C: TenantConnector> {
    runtime: &'rt Runtime<C>,
    tenant: TenantHandle,
    state: Option<Arc<TenantState>>,
    connection: Option<ConnectionInfo<C::Connection>>,
    caches: CacheCheckoutTable,
    failed: bool,
    finished: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'rt, C: TenantConnector> ExecutionContext<'rt, C> {
    pub(crate) fn new(runtime: &'rt Runtime<C>, tenant: TenantHandle) -> Self {
        Self {
            runtime,
            tenant,
            state: None,
            connection: None,
            caches: CacheCheckoutTable::new(),
            failed: false,
            finished: false,
            _not_send: PhantomData,
        }
    }

    pub fn tenant(&self) -> TenantHandle {
        self.tenant
    }

    pub fn runtime(&self) -> &'rt Runtime<C> {
        self.runtime
    }

    /// The tenant's connection, acquired from the pool on first use and held until teardown
    pub fn connection(&mut self) -> Result<&mut C::Connection> {
        if self.connection.is_none() {
            self.connection = Some(self.runtime.pool().acquire(self.tenant)?);
        }
        self.connection
            .as_mut()
            .map(ConnectionInfo::connection_mut)
            .ok_or_else(|| TenancyError::invariant("connection missing after acquire"))
    }

    pub fn connection_info(&self) -> Option<&ConnectionInfo<C::Connection>> {
        self.connection.as_ref()
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Run `f` with the tenant's connection
    pub fn with_connection<R>(&mut self, f: impl FnOnce(&mut C::Connection) -> R) -> Result<R> {
        let connection = self.connection()?;
        Ok(f(connection))
    }

    /// Return the connection to the pool before the unit of work ends. No-op if none is held.
    pub fn release_connection(&mut self) -> Result<()> {
        match self.connection.take() {
            Some(info) => self.runtime.pool().release(info),
            None => Ok(()),
        }
    }

    /// Check out a tenant cache for the rest of this unit of work
    pub fn cache<T: TenantCache>(&mut self, handle: &CacheHandle<T>) -> Result<CacheRef<'_, T>> {
        let state = self.state()?;
        self.caches.checkout(&state, self.runtime.caches(), handle)
    }

    /// The cache instance this unit of work already holds, without checking one out
    pub fn cache_if_checked_out<T: TenantCache>(
        &mut self,
        handle: &CacheHandle<T>,
    ) -> Result<Option<&mut T>> {
        self.caches.if_checked_out(self.runtime.caches(), handle)
    }

    /// Invalidate a cache type for this tenant, returning the slot's new serial
    pub fn invalidate_cache<T: TenantCache>(&mut self, handle: &CacheHandle<T>) -> Result<u64> {
        let state = self.state()?;
        self.caches.invalidate(&state, self.runtime.caches(), handle)
    }

    /// Run `f` with this tenant's counters locked
    pub fn with_counters<R>(&mut self, f: impl FnOnce(&mut TenantCounters) -> R) -> Result<R> {
        Ok(self.state()?.with_counters(f))
    }

    /// Number of cache types leased to this unit of work
    pub fn checked_out_caches(&self) -> usize {
        self.caches.len()
    }

    /// Treat the unit of work as failed: the connection is aborted before release
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// End the unit of work now and report what teardown did
    pub fn finish(mut self) -> TeardownReport {
        self.finished = true;
        self.teardown()
    }

    fn state(&mut self) -> Result<Arc<TenantState>> {
        if let Some(state) = &self.state {
            return Ok(Arc::clone(state));
        }
        if !self.tenant.is_tenant() {
            return Err(TenancyError::NoTenantSelected);
        }
        let state = self.runtime.tenant_states().get_or_create(self.tenant)?;
        self.state = Some(Arc::clone(&state));
        Ok(state)
    }

    /// Unbind the thread, return or discard the connection, then check in caches.
    ///
    /// Cache hooks run last: a failing or panicking hook never leaves the thread bound or
    /// the connection checked out.
    fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        clear_current();

        if let Some(mut info) = self.connection.take() {
            let pool = self.runtime.pool();
            let outcome = if self.failed {
                match pool.connector().abort(info.connection_mut()) {
                    Ok(()) => pool
                        .release(info)
                        .map(|()| ConnectionOutcome::AbortedAndReleased),
                    Err(source) => {
                        warn!(
                            tenant = %self.tenant,
                            connection_id = %info.id(),
                            error = %source,
                            "🏢 TENANT: Abort failed, discarding connection"
                        );
                        pool.discard(info).map(|()| ConnectionOutcome::Discarded)
                    }
                }
            } else {
                pool.release(info).map(|()| ConnectionOutcome::Released)
            };
            match outcome {
                Ok(outcome) => report.connection = outcome,
                Err(err) => {
                    log_error("execution", "release_connection", &err, None);
                    report.errors.push(err);
                }
            }
        }

        if let Some(state) = self.state.take() {
            report.caches = self.caches.checkin_all(&state, self.runtime.caches());
        }

        log_tenant_operation(
            "exit",
            self.tenant,
            Some(if self.failed { "failed" } else { "completed" }),
        );
        report
    }
}

impl<C: TenantConnector> Drop for ExecutionContext<'_, C> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if std::thread::panicking() {
            self.failed = true;
        }
        let report = self.teardown();
        if !report.is_clean() {
            warn!(
                tenant = %self.tenant,
                cache_failures = report.caches.failures.len(),
                errors = report.errors.len(),
                "🏢 TENANT: Teardown completed with failures"
            );
        }
    }
}

impl<C: TenantConnector> std::fmt::Debug for ExecutionContext<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("tenant", &self.tenant)
            .field("has_connection", &self.connection.is_some())
            .field("caches", &self.caches)
            .field("failed", &self.failed)
            .finish()
    }
}
