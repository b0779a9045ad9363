//! Connector seam and per-connection bookkeeping.

use crate::tenant::TenantHandle;
use chrono::{DateTime, Utc};
use std::ops::{Deref, DerefMut};
use std::thread::ThreadId;
use uuid::Uuid;

/// Opens and prepares raw database connections for the tenant-aware pool.
///
/// Implementations perform blocking I/O. The pool never calls a connector while holding
/// one of its own locks.
pub trait TenantConnector: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a brand-new connection
    fn connect(&self) -> anyhow::Result<Self::Connection>;

    /// Scope the connection to `tenant` (e.g. set the schema search path)
    fn configure(&self, connection: &mut Self::Connection, tenant: TenantHandle) -> anyhow::Result<()>;

    /// Re-validate a connection after `configure` failed, reconnecting if needed
    fn reset(&self, connection: &mut Self::Connection) -> anyhow::Result<()>;

    /// Undo unfinished work after the unit of work holding the connection failed
    fn abort(&self, _connection: &mut Self::Connection) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A pooled connection and the tenants it has served
#[derive(Debug)]
pub struct ConnectionInfo<Conn> {
    pub(crate) id: Uuid,
    pub(crate) pool_id: u64,
    pub(crate) connection: Conn,
    pub(crate) last_checkout: u64,
    pub(crate) owning_tenant: Option<TenantHandle>,
    pub(crate) owning_thread: Option<ThreadId>,
    pub(crate) tenants_seen: Vec<TenantHandle>,
    pub(crate) created_at: DateTime<Utc>,
}

impl<Conn> ConnectionInfo<Conn> {
    pub(crate) fn new(pool_id: u64, connection: Conn) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool_id,
            connection,
            last_checkout: 0,
            owning_tenant: None,
            owning_thread: None,
            tenants_seen: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connection(&self) -> &Conn {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Conn {
        &mut self.connection
    }

    /// Checkout counter value stamped by the most recent acquire
    pub fn last_checkout(&self) -> u64 {
        self.last_checkout
    }

    /// Tenant currently holding the connection; `None` while pooled
    pub fn owning_tenant(&self) -> Option<TenantHandle> {
        self.owning_tenant
    }

    pub fn owning_thread(&self) -> Option<ThreadId> {
        self.owning_thread
    }

    /// Every tenant this connection has been configured for, in first-seen order
    pub fn tenants_seen(&self) -> &[TenantHandle] {
        &self.tenants_seen
    }

    pub fn has_served(&self, tenant: TenantHandle) -> bool {
        self.tenants_seen.contains(&tenant)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn mark_checked_out(&mut self, tenant: TenantHandle, checkout: u64) {
        if !self.has_served(tenant) {
            self.tenants_seen.push(tenant);
        }
        self.owning_tenant = Some(tenant);
        self.owning_thread = Some(std::thread::current().id());
        self.last_checkout = checkout;
    }

    pub(crate) fn mark_released(&mut self) -> Option<TenantHandle> {
        self.owning_thread = None;
        self.owning_tenant.take()
    }
}

impl<Conn> Deref for ConnectionInfo<Conn> {
    type Target = Conn;

    fn deref(&self) -> &Conn {
        &self.connection
    }
}

impl<Conn> DerefMut for ConnectionInfo<Conn> {
    fn deref_mut(&mut self) -> &mut Conn {
        &mut self.connection
    }
}
