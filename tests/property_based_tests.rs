mod common;

use common::strategies::*;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tenancy_core::cache::CacheCheckoutTable;
use tenancy_core::config::ConnectionPoolConfig;
use tenancy_core::database::{ConnectionInfo, TenantAwarePool};
use tenancy_core::registry::{CacheRegistry, SharingMode, TenantCache};
use tenancy_core::tenant::TenantStates;
use tenancy_core::test_helpers::{MockConnection, MockConnector};
use tenancy_core::TenantHandle;

static NEXT_TAG: AtomicU64 = AtomicU64::new(1);

/// Cache carrying nothing but a process-unique tag
#[derive(Debug)]
struct Tagged {
    tag: u64,
}

impl Tagged {
    fn new() -> Self {
        Self {
            tag: NEXT_TAG.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl TenantCache for Tagged {}

/// What a single cache slot should contain after each step
#[derive(Debug, Default)]
struct SlotModel {
    pooled: Vec<u64>,
    serial: u64,
    held: Vec<Option<(u64, u64)>>,
    stale: HashSet<u64>,
}

proptest! {
    /// Property: pool structures stay bounded and held connections are never shared
    #[test]
    fn pool_invariants_hold_for_any_operation_sequence(ops in pool_ops_strategy()) {
        let config = ConnectionPoolConfig::for_test();
        let recent_cap = config.max_connections_in_recent;
        let max_tenants = config.max_tenants_per_connection;
        let pool = TenantAwarePool::new(MockConnector::new(), config);
        let mut held: Vec<ConnectionInfo<MockConnection>> = Vec::new();

        for op in ops {
            match op {
                PoolOp::Acquire(id) => {
                    let tenant = TenantHandle::Tenant(id);
                    let info = pool.acquire(tenant).unwrap();
                    prop_assert_eq!(info.owning_tenant(), Some(tenant));
                    prop_assert_eq!(info.configured_for, Some(tenant));
                    prop_assert!(info.tenants_seen().len() <= max_tenants);
                    held.push(info);
                }
                PoolOp::Release(index) => {
                    if !held.is_empty() {
                        let info = held.remove(index % held.len());
                        pool.release(info).unwrap();
                    }
                }
            }

            prop_assert!(pool.recent_count() <= recent_cap);
            let ids: HashSet<_> = held.iter().map(|info| info.id()).collect();
            prop_assert_eq!(ids.len(), held.len());
            prop_assert_eq!(pool.checked_out_count(), held.len());
        }

        for info in held.drain(..) {
            pool.release(info).unwrap();
        }
        let report = pool.report();
        prop_assert!(!report.has_bad_states(), "{}", report);
        prop_assert_eq!(report.total_connections(), pool.connection_count());
    }

    /// Property: an instance leased before an invalidation is never handed out again,
    /// and the serial moves exactly once per invalidation
    #[test]
    fn stale_cache_instances_never_reenter_the_pool(ops in cache_ops_strategy(3)) {
        let mut registry = CacheRegistry::new();
        let handle = registry
            .register("Tagged", SharingMode::PerThread, Tagged::new)
            .unwrap();
        registry.seal();
        let states = TenantStates::new(registry.len());
        let state = states.get_or_create(TenantHandle::Tenant(1)).unwrap();

        let mut tables: Vec<CacheCheckoutTable> = (0..3).map(|_| CacheCheckoutTable::new()).collect();
        let mut model = SlotModel {
            held: vec![None; 3],
            ..SlotModel::default()
        };

        for op in ops {
            match op {
                CacheOp::Checkout(worker) => {
                    let tag = tables[worker].checkout(&state, &registry, &handle).unwrap().tag;
                    match model.held[worker] {
                        // A lease is kept for the whole unit of work, even once stale
                        Some((held_tag, _)) => prop_assert_eq!(tag, held_tag),
                        None => {
                            prop_assert!(!model.stale.contains(&tag), "stale instance {} handed out", tag);
                            if let Some(expected) = model.pooled.pop() {
                                prop_assert_eq!(tag, expected);
                            }
                            model.held[worker] = Some((tag, model.serial));
                        }
                    }
                }
                CacheOp::Invalidate(worker) => {
                    let serial = tables[worker].invalidate(&state, &registry, &handle).unwrap();
                    model.serial += 1;
                    prop_assert_eq!(serial, model.serial);
                    model.stale.extend(model.pooled.drain(..));
                    for (tag, _) in model.held.iter().flatten() {
                        model.stale.insert(*tag);
                    }
                    model.held[worker] = None;
                }
                CacheOp::Checkin(worker) => {
                    let report = tables[worker].checkin_all(&state, &registry);
                    prop_assert!(report.failures.is_empty());
                    if let Some((tag, serial_at_checkout)) = model.held[worker].take() {
                        if serial_at_checkout == model.serial {
                            prop_assert_eq!(report.returned, 1);
                            model.pooled.push(tag);
                        } else {
                            prop_assert_eq!(report.discarded_stale, 1);
                        }
                    }
                }
            }

            prop_assert_eq!(state.serial(handle.index()), Some(model.serial));
            prop_assert_eq!(state.pooled_count(handle.index()), Some(model.pooled.len()));
            for (worker, table) in tables.iter().enumerate() {
                prop_assert_eq!(table.holds(handle.index()), model.held[worker].is_some());
            }
        }
    }
}
