//! # Mock Connector
//!
//! In-memory [`TenantConnector`] with call counters and failure injection, for exercising
//! the pool and execution contexts without a database.

use crate::database::TenantConnector;
use crate::execution::TenantDirectory;
use crate::tenant::TenantHandle;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Connection handed out by [`MockConnector`]
#[derive(Debug)]
pub struct MockConnection {
    /// Sequence number, 0 for the first connection a connector opens
    pub number: u64,
    pub configured_for: Option<TenantHandle>,
    /// Set by [`begin`](Self::begin), cleared by an abort
    pub open_transaction: bool,
}

impl MockConnection {
    pub fn begin(&mut self) {
        self.open_transaction = true;
    }
}

#[derive(Debug, Default)]
pub struct MockConnector {
    connects: AtomicU64,
    configure_calls: AtomicU64,
    resets: AtomicU64,
    aborts: AtomicU64,
    fail_connect: AtomicBool,
    fail_configure_always: AtomicBool,
    fail_next_configures: AtomicU64,
    fail_abort: AtomicBool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections opened so far, pooled or not
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn configure_calls(&self) -> u64 {
        self.configure_calls.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> u64 {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Every configure fails, as with a database that went away
    pub fn fail_configure_always(&self, fail: bool) {
        self.fail_configure_always.store(fail, Ordering::SeqCst);
    }

    /// The next `count` configure calls fail, then configuring works again
    pub fn fail_next_configures(&self, count: u64) {
        self.fail_next_configures.store(count, Ordering::SeqCst);
    }

    pub fn fail_abort(&self, fail: bool) {
        self.fail_abort.store(fail, Ordering::SeqCst);
    }

    fn take_configure_failure(&self) -> bool {
        self.fail_configure_always.load(Ordering::SeqCst)
            || self
                .fail_next_configures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }
}

impl TenantConnector for MockConnector {
    type Connection = MockConnection;

    fn connect(&self) -> anyhow::Result<MockConnection> {
        if self.fail_connect.load(Ordering::SeqCst) {
            anyhow::bail!("mock database refused the connection");
        }
        Ok(MockConnection {
            number: self.connects.fetch_add(1, Ordering::SeqCst),
            configured_for: None,
            open_transaction: false,
        })
    }

    fn configure(&self, connection: &mut MockConnection, tenant: TenantHandle) -> anyhow::Result<()> {
        self.configure_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_configure_failure() {
            anyhow::bail!("mock connection {} is dead", connection.number);
        }
        connection.configured_for = Some(tenant);
        Ok(())
    }

    fn reset(&self, connection: &mut MockConnection) -> anyhow::Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        connection.configured_for = None;
        Ok(())
    }

    fn abort(&self, connection: &mut MockConnection) -> anyhow::Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        if self.fail_abort.load(Ordering::SeqCst) {
            anyhow::bail!("mock rollback failed");
        }
        connection.open_transaction = false;
        Ok(())
    }
}

/// Fixed tenant list
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    tenants: Vec<TenantHandle>,
}

impl StaticDirectory {
    pub fn new(ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            tenants: ids.into_iter().map(TenantHandle::Tenant).collect(),
        }
    }
}

impl TenantDirectory for StaticDirectory {
    fn tenants(&self) -> anyhow::Result<Vec<TenantHandle>> {
        Ok(self.tenants.clone())
    }
}
