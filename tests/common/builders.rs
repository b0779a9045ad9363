//! Cache types and runtime builders shared by the integration tests.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tenancy_core::config::TenancyConfig;
use tenancy_core::execution::Runtime;
use tenancy_core::logging::init_structured_logging;
use tenancy_core::registry::{CacheHandle, SharingMode, TenantCache};
use tenancy_core::test_helpers::{mock_runtime_builder, MockConnector};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

fn next_instance() -> u64 {
    NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)
}

/// Per-thread cache that records its own lifecycle
#[derive(Debug)]
pub struct Notebook {
    pub instance: u64,
    pub entries: Vec<String>,
    pub checkouts: u32,
    pub fail_next_checkin: bool,
    /// Shared with the factory, bumped by `on_invalidated`
    invalidations: Arc<AtomicUsize>,
}

impl Notebook {
    pub fn new() -> Self {
        Self::reporting_to(Arc::new(AtomicUsize::new(0)))
    }

    pub fn reporting_to(invalidations: Arc<AtomicUsize>) -> Self {
        Self {
            instance: next_instance(),
            entries: Vec::new(),
            checkouts: 0,
            fail_next_checkin: false,
            invalidations,
        }
    }
}

impl TenantCache for Notebook {
    fn on_checkout(&mut self) -> anyhow::Result<()> {
        self.checkouts += 1;
        Ok(())
    }

    fn on_checkin(&mut self) -> anyhow::Result<()> {
        if std::mem::take(&mut self.fail_next_checkin) {
            anyhow::bail!("notebook {} is corrupted", self.instance);
        }
        Ok(())
    }

    fn on_invalidated(&mut self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn approximate_len(&self) -> Option<usize> {
        Some(self.entries.len())
    }
}

/// Shared cache, internally synchronized
#[derive(Debug)]
pub struct SharedLookup {
    pub instance: u64,
    pub values: Mutex<Vec<String>>,
}

impl SharedLookup {
    pub fn new() -> Self {
        Self {
            instance: next_instance(),
            values: Mutex::new(Vec::new()),
        }
    }
}

impl TenantCache for SharedLookup {
    fn approximate_len(&self) -> Option<usize> {
        Some(self.values.lock().len())
    }
}

/// Cache whose checkout hook always fails
#[derive(Debug, Default)]
pub struct Unwarmable;

impl TenantCache for Unwarmable {
    fn on_checkout(&mut self) -> anyhow::Result<()> {
        anyhow::bail!("warm-up query failed")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TestCaches {
    pub notebook: CacheHandle<Notebook>,
    pub lookup: CacheHandle<SharedLookup>,
    pub unwarmable: CacheHandle<Unwarmable>,
}

pub fn build_runtime() -> (Runtime<MockConnector>, TestCaches) {
    build_runtime_with(TenancyConfig::for_test())
}

pub fn build_runtime_with(config: TenancyConfig) -> (Runtime<MockConnector>, TestCaches) {
    let (runtime, caches, _) = build_runtime_counting_invalidations(config);
    (runtime, caches)
}

/// Like [`build_runtime_with`], also returning how many notebooks were told they are stale
pub fn build_runtime_counting_invalidations(
    config: TenancyConfig,
) -> (Runtime<MockConnector>, TestCaches, Arc<AtomicUsize>) {
    init_structured_logging();
    let invalidations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invalidations);
    let mut builder = mock_runtime_builder().config(config);
    let caches = TestCaches {
        notebook: builder
            .register_cache("Notebook", SharingMode::PerThread, move || {
                Notebook::reporting_to(Arc::clone(&counter))
            })
            .expect("register notebook"),
        lookup: builder
            .register_cache("Shared lookup", SharingMode::Shared, SharedLookup::new)
            .expect("register lookup"),
        unwarmable: builder
            .register_cache("Unwarmable", SharingMode::PerThread, Unwarmable::default)
            .expect("register unwarmable"),
    };
    (builder.build().expect("build runtime"), caches, invalidations)
}
