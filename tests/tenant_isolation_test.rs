//! Tenant isolation under concurrent use of one runtime from many threads.

mod common;

use common::builders::build_runtime;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;
use tenancy_core::{TenancyError, TenantHandle};
use uuid::Uuid;

const THREADS: usize = 8;
const ROUNDS: usize = 200;

#[test]
fn test_connection_never_shared_between_live_units_of_work() {
    let (runtime, _) = build_runtime();
    let owners: DashMap<Uuid, TenantHandle> = DashMap::new();
    let violations = AtomicUsize::new(0);
    let barrier = Barrier::new(THREADS);

    thread::scope(|scope| {
        for worker in 0..THREADS {
            let (runtime, owners, violations, barrier) = (&runtime, &owners, &violations, &barrier);
            scope.spawn(move || {
                barrier.wait();
                for round in 0..ROUNDS {
                    let tenant = TenantHandle::Tenant(((worker + round) % 5) as u32);
                    runtime
                        .enter(tenant, |ctx| {
                            let configured_for = ctx.connection()?.configured_for;
                            let id = ctx
                                .connection_info()
                                .map(|info| info.id())
                                .ok_or_else(|| TenancyError::invariant("no connection"))?;

                            if configured_for != Some(tenant) {
                                violations.fetch_add(1, Ordering::SeqCst);
                            }
                            if owners.insert(id, tenant).is_some() {
                                violations.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::yield_now();
                            owners.remove(&id);
                            Ok::<_, TenancyError>(())
                        })
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert_eq!(runtime.pool().checked_out_count(), 0);
    let report = runtime.pool().report();
    assert!(!report.has_bad_states(), "{report}");
    for connection in report.older.iter().chain(report.recent.iter().map(|e| &e.connection)) {
        assert!(connection.tenants_seen.len() <= runtime.config().pool.max_tenants_per_connection);
    }
}

#[test]
fn test_caches_never_cross_tenants() {
    let (runtime, caches) = build_runtime();

    thread::scope(|scope| {
        for worker in 0..THREADS {
            let runtime = &runtime;
            scope.spawn(move || {
                for round in 0..ROUNDS {
                    let id = ((worker + round) % 4) as u32;
                    runtime
                        .enter(TenantHandle::Tenant(id), |ctx| {
                            let mut notebook = ctx.cache(&caches.notebook)?;
                            let entries = &mut notebook
                                .get_mut()
                                .ok_or_else(|| TenancyError::invariant("notebook is per-thread"))?
                                .entries;
                            let marker = format!("tenant-{id}");
                            assert!(entries.iter().all(|e| *e == marker));
                            entries.push(marker);
                            Ok::<_, TenancyError>(())
                        })
                        .unwrap();
                }
            });
        }
    });

    for id in 0..4 {
        let report = runtime.cache_report(TenantHandle::Tenant(id)).unwrap();
        let slot = report.slot("Notebook").unwrap();
        assert!(slot.pooled >= 1);
        assert!(slot.pooled <= THREADS);
    }
}

#[test]
fn test_each_thread_has_its_own_tenant_binding() {
    let (runtime, _) = build_runtime();
    let barrier = Barrier::new(2);

    thread::scope(|scope| {
        for id in [1u32, 2] {
            let (runtime, barrier) = (&runtime, &barrier);
            scope.spawn(move || {
                runtime
                    .enter(TenantHandle::Tenant(id), |_| {
                        // Both threads are inside a unit of work at the same time
                        barrier.wait();
                        assert_eq!(runtime.current_tenant(), Some(TenantHandle::Tenant(id)));
                        Ok::<_, TenancyError>(())
                    })
                    .unwrap();
            });
        }
    });
    assert_eq!(runtime.current_tenant(), None);
}
