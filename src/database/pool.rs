//! # Tenant-Aware Connection Pool
//!
//! Connections remember every tenant they have been configured for. Acquiring for a tenant
//! prefers, in order:
//!
//! 1. the connection that tenant released most recently (the recently-used map),
//! 2. an older connection that has served the tenant before,
//! 3. once the older list is long enough, the older connection with the fewest tenants,
//!    provided it is still below the per-connection tenant cap,
//! 4. a brand-new connection.
//!
//! The recently-used map and the older list sit behind separate locks and are never locked
//! together, so serving a tenant from the recently-used map does not contend with scans
//! of the older list. The connector is only ever called with both locks released.

use crate::config::ConnectionPoolConfig;
use crate::database::connection::{ConnectionInfo, TenantConnector};
use crate::diagnostics::{ConnectionSummary, PoolReport, RecentEntry};
use crate::error::{Result, TenancyError};
use crate::logging::{log_error, log_pool_operation};
use crate::tenant::TenantHandle;
use crossbeam::utils::CachePadded;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Where `acquire` found its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Recent,
    OlderSameTenant,
    OlderRepurposed,
    New,
}

impl Source {
    fn as_str(self) -> &'static str {
        match self {
            Source::Recent => "recent",
            Source::OlderSameTenant => "older_same_tenant",
            Source::OlderRepurposed => "older_repurposed",
            Source::New => "new",
        }
    }
}

struct PoolLists<Conn> {
    /// Connections not tagged as recent for any tenant, warmest first
    older: VecDeque<ConnectionInfo<Conn>>,
    /// Every live connection this pool has created
    all: HashSet<Uuid>,
}

/// Pool of database connections shared by all tenants
pub struct TenantAwarePool<C: TenantConnector> {
    id: u64,
    connector: Arc<C>,
    config: ConnectionPoolConfig,
    checkout_counter: CachePadded<AtomicU64>,
    recent: Mutex<HashMap<TenantHandle, ConnectionInfo<C::Connection>>>,
    lists: Mutex<PoolLists<C::Connection>>,
    /// Connections currently checked out, for diagnostics
    checked_out: DashMap<Uuid, TenantHandle>,
}

impl<C: TenantConnector> TenantAwarePool<C> {
    pub fn new(connector: C, config: ConnectionPoolConfig) -> Self {
        Self::with_shared_connector(Arc::new(connector), config)
    }

    pub fn with_shared_connector(connector: Arc<C>, config: ConnectionPoolConfig) -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            pool_id = id,
            max_recent = config.max_connections_in_recent,
            max_tenants_per_connection = config.max_tenants_per_connection,
            "🏊 POOL: Tenant-aware connection pool created"
        );
        Self {
            id,
            connector,
            config,
            checkout_counter: CachePadded::new(AtomicU64::new(0)),
            recent: Mutex::new(HashMap::new()),
            lists: Mutex::new(PoolLists {
                older: VecDeque::new(),
                all: HashSet::new(),
            }),
            checked_out: DashMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &ConnectionPoolConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// A connection configured for `tenant`, owned by the caller until [`release`](Self::release)
    pub fn acquire(&self, tenant: TenantHandle) -> Result<ConnectionInfo<C::Connection>> {
        let (info, source) = self.select(tenant)?;
        let info = self.configure_for(info, tenant)?;

        self.checked_out.insert(info.id, tenant);
        debug!(
            tenant = %tenant,
            connection_id = %info.id,
            source = source.as_str(),
            checkout = info.last_checkout,
            tenants_seen = info.tenants_seen.len(),
            "🏊 POOL: Connection acquired"
        );
        Ok(info)
    }

    /// Return a connection acquired from this pool
    pub fn release(&self, mut info: ConnectionInfo<C::Connection>) -> Result<()> {
        if info.pool_id != self.id {
            return Err(TenancyError::invariant(format!(
                "connection {} was released to pool {} but belongs to pool {}",
                info.id, self.id, info.pool_id
            )));
        }
        let Some(tenant) = info.mark_released() else {
            return Err(TenancyError::invariant(format!(
                "connection {} released without an outstanding checkout",
                info.id
            )));
        };
        self.checked_out.remove(&info.id);
        let connection_id = info.id;

        let evicted = {
            let mut recent = self.recent.lock();
            let mut evicted = Vec::new();

            if let Some(displaced) = recent.insert(tenant, info) {
                evicted.push(displaced);
            }

            if recent.len() > self.config.max_connections_in_recent {
                let oldest = recent
                    .iter()
                    .min_by_key(|(_, c)| c.last_checkout)
                    .map(|(t, _)| *t);
                if let Some(entry) = oldest.and_then(|t| recent.remove(&t)) {
                    evicted.push(entry);
                }
            }

            let cutoff = self
                .checkout_counter
                .load(Ordering::Relaxed)
                .saturating_sub(self.config.max_checkouts_in_recent);
            let expired: Vec<TenantHandle> = recent
                .iter()
                .filter(|(_, c)| c.last_checkout < cutoff)
                .map(|(t, _)| *t)
                .collect();
            for t in expired {
                if let Some(entry) = recent.remove(&t) {
                    evicted.push(entry);
                }
            }
            evicted
        };

        let evicted_count = evicted.len();
        if evicted_count > 0 {
            let mut lists = self.lists.lock();
            for entry in evicted {
                lists.older.push_front(entry);
            }
        }

        log_pool_operation(
            "release",
            tenant,
            Some(&connection_id),
            "released",
            (evicted_count > 0)
                .then(|| format!("{evicted_count} moved to older"))
                .as_deref(),
        );
        Ok(())
    }

    /// Drop a checked-out connection instead of returning it to the pool
    pub fn discard(&self, info: ConnectionInfo<C::Connection>) -> Result<()> {
        if info.pool_id != self.id {
            return Err(TenancyError::invariant(format!(
                "connection {} discarded to pool {} but belongs to pool {}",
                info.id, self.id, info.pool_id
            )));
        }
        self.checked_out.remove(&info.id);
        self.forget(info.id);
        warn!(
            connection_id = %info.id,
            tenant = ?info.owning_tenant,
            "🏊 POOL: Connection discarded"
        );
        Ok(())
    }

    /// RAII checkout: the connection goes back to the pool when the guard drops
    pub fn checkout(&self, tenant: TenantHandle) -> Result<PooledConnection<'_, C>> {
        let info = self.acquire(tenant)?;
        Ok(PooledConnection {
            pool: self,
            info: Some(info),
        })
    }

    /// Run `f` with a connection for `tenant`, releasing it afterwards
    pub fn with_connection<R>(
        &self,
        tenant: TenantHandle,
        f: impl FnOnce(&mut C::Connection) -> R,
    ) -> Result<R> {
        let mut connection = self.checkout(tenant)?;
        let value = f(&mut connection);
        connection.release()?;
        Ok(value)
    }

    /// A raw connection outside the pool's bookkeeping, e.g. for maintenance work
    pub fn make_unassigned_connection(&self) -> Result<C::Connection> {
        self.connector
            .connect()
            .map_err(|source| TenancyError::ConnectFailed { source })
    }

    /// Whether the pool has created any connection that is still alive
    pub fn has_connections(&self) -> bool {
        !self.lists.lock().all.is_empty()
    }

    pub fn connection_count(&self) -> usize {
        self.lists.lock().all.len()
    }

    pub fn recent_count(&self) -> usize {
        self.recent.lock().len()
    }

    pub fn older_count(&self) -> usize {
        self.lists.lock().older.len()
    }

    pub fn checked_out_count(&self) -> usize {
        self.checked_out.len()
    }

    pub fn checkout_counter(&self) -> u64 {
        self.checkout_counter.load(Ordering::Relaxed)
    }

    /// Tenants which currently have a recently-used connection
    pub fn recent_tenants(&self) -> Vec<TenantHandle> {
        let mut tenants: Vec<TenantHandle> = self.recent.lock().keys().copied().collect();
        tenants.sort_unstable();
        tenants
    }

    /// Capture a diagnostic report of pool occupancy
    pub fn report(&self) -> PoolReport {
        let recent: Vec<RecentEntry> = self
            .recent
            .lock()
            .iter()
            .map(|(tenant, info)| RecentEntry {
                tenant: *tenant,
                connection: ConnectionSummary::from_info(info),
            })
            .collect();
        let (older, all) = {
            let lists = self.lists.lock();
            let older: Vec<ConnectionSummary> =
                lists.older.iter().map(ConnectionSummary::from_info).collect();
            (older, lists.all.iter().copied().collect::<Vec<_>>())
        };
        let active: HashSet<Uuid> = self.checked_out.iter().map(|e| *e.key()).collect();
        PoolReport::build(
            self.id,
            self.checkout_counter(),
            recent,
            older,
            all,
            &active,
        )
    }

    fn select(&self, tenant: TenantHandle) -> Result<(ConnectionInfo<C::Connection>, Source)> {
        if let Some(info) = self.recent.lock().remove(&tenant) {
            return Ok((info, Source::Recent));
        }

        {
            let mut lists = self.lists.lock();
            let served = lists.older.iter().position(|c| c.has_served(tenant));
            if let Some(info) = served.and_then(|pos| lists.older.remove(pos)) {
                return Ok((info, Source::OlderSameTenant));
            }

            if lists.older.len() >= self.config.reuse_older_connections_threshold {
                let mut fewest: Option<(usize, usize)> = None;
                for (pos, candidate) in lists.older.iter().enumerate() {
                    let seen = candidate.tenants_seen.len();
                    if seen < self.config.max_tenants_per_connection
                        && fewest.map_or(true, |(_, best)| seen < best)
                    {
                        fewest = Some((pos, seen));
                    }
                }
                if let Some(info) = fewest.and_then(|(pos, _)| lists.older.remove(pos)) {
                    return Ok((info, Source::OlderRepurposed));
                }
            }
        }

        let connection = self.connector.connect().map_err(|source| {
            let err = TenancyError::ConnectFailed { source };
            log_error("pool", "connect", &err, Some(&tenant.to_string()));
            err
        })?;
        let info = ConnectionInfo::new(self.id, connection);
        self.lists.lock().all.insert(info.id);
        info!(
            tenant = %tenant,
            connection_id = %info.id,
            "🏊 POOL: Opened new connection"
        );
        Ok((info, Source::New))
    }

    /// Configure for `tenant`, resetting the raw connection between failed attempts
    fn configure_for(
        &self,
        mut info: ConnectionInfo<C::Connection>,
        tenant: TenantHandle,
    ) -> Result<ConnectionInfo<C::Connection>> {
        let attempts = self.config.max_configure_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.connector.configure(&mut info.connection, tenant) {
                Ok(()) => {
                    let checkout = self.checkout_counter.fetch_add(1, Ordering::Relaxed) + 1;
                    info.mark_checked_out(tenant, checkout);
                    return Ok(info);
                }
                Err(err) => {
                    warn!(
                        tenant = %tenant,
                        connection_id = %info.id,
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        "🏊 POOL: Failed to configure connection, resetting"
                    );
                    last_error = Some(err);
                    if attempt < attempts {
                        if let Err(reset_err) = self.connector.reset(&mut info.connection) {
                            warn!(
                                connection_id = %info.id,
                                error = %reset_err,
                                "🏊 POOL: Connection reset failed"
                            );
                        }
                    }
                }
            }
        }

        self.forget(info.id);
        let last_error =
            last_error.unwrap_or_else(|| anyhow::anyhow!("connection could not be configured"));
        error!(
            tenant = %tenant,
            connection_id = %info.id,
            attempts,
            error = %last_error,
            "🏊 POOL: No working connection available"
        );
        Err(TenancyError::connection_unavailable(tenant, attempts, &last_error))
    }

    fn forget(&self, id: Uuid) {
        self.lists.lock().all.remove(&id);
    }
}

impl<C: TenantConnector> std::fmt::Debug for TenantAwarePool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantAwarePool")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("checkout_counter", &self.checkout_counter())
            .finish_non_exhaustive()
    }
}

/// A checked-out connection that returns itself to the pool on drop
pub struct PooledConnection<'p, C: TenantConnector> {
    pool: &'p TenantAwarePool<C>,
    info: Option<ConnectionInfo<C::Connection>>,
}

impl<C: TenantConnector> PooledConnection<'_, C> {
    pub fn info(&self) -> Option<&ConnectionInfo<C::Connection>> {
        self.info.as_ref()
    }

    /// Release now, surfacing any pool invariant error
    pub fn release(mut self) -> Result<()> {
        match self.info.take() {
            Some(info) => self.pool.release(info),
            None => Ok(()),
        }
    }

    /// Drop the connection instead of returning it
    pub fn discard(mut self) -> Result<()> {
        match self.info.take() {
            Some(info) => self.pool.discard(info),
            None => Ok(()),
        }
    }

    /// Detach from the guard; the caller becomes responsible for releasing
    pub fn into_inner(mut self) -> Option<ConnectionInfo<C::Connection>> {
        self.info.take()
    }
}

impl<C: TenantConnector> Deref for PooledConnection<'_, C> {
    type Target = C::Connection;

    fn deref(&self) -> &C::Connection {
        match &self.info {
            Some(info) => &info.connection,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<C: TenantConnector> DerefMut for PooledConnection<'_, C> {
    fn deref_mut(&mut self) -> &mut C::Connection {
        match &mut self.info {
            Some(info) => &mut info.connection,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<C: TenantConnector> Drop for PooledConnection<'_, C> {
    fn drop(&mut self) {
        if let Some(info) = self.info.take() {
            if let Err(err) = self.pool.release(info) {
                log_error("pool", "release", &err, None);
            }
        }
    }
}
