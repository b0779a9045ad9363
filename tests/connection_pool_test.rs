//! Connection pool behaviour: reuse preference, bounded structures, dead connections.

use std::collections::HashSet;
use tenancy_core::config::ConnectionPoolConfig;
use tenancy_core::database::TenantAwarePool;
use tenancy_core::diagnostics::ConnectionState;
use tenancy_core::test_helpers::MockConnector;
use tenancy_core::{TenancyError, TenantHandle};

fn pool_with(config: ConnectionPoolConfig) -> TenantAwarePool<MockConnector> {
    TenantAwarePool::new(MockConnector::new(), config)
}

fn tenant(id: u32) -> TenantHandle {
    TenantHandle::Tenant(id)
}

#[test]
fn test_acquire_release_acquire_returns_identical_connection() {
    let pool = pool_with(ConnectionPoolConfig::default());

    let first = pool.acquire(tenant(5)).unwrap();
    let id = first.id();
    let number = first.number;
    pool.release(first).unwrap();

    let second = pool.acquire(tenant(5)).unwrap();
    assert_eq!(second.id(), id);
    assert_eq!(second.number, number);
    assert_eq!(second.configured_for, Some(tenant(5)));
    assert_eq!(pool.connector().connects(), 1);
}

#[test]
fn test_dead_connection_retries_to_bound_then_fails() {
    let config = ConnectionPoolConfig::default();
    let attempts = config.max_configure_attempts;
    let pool = pool_with(config);

    // Warm a connection for tenant 5, then kill the database
    let warm = pool.acquire(tenant(5)).unwrap();
    let dead_id = warm.id();
    pool.release(warm).unwrap();
    pool.connector().fail_configure_always(true);
    let calls_before = pool.connector().configure_calls();

    let err = pool.acquire(tenant(5)).unwrap_err();
    match &err {
        TenancyError::ConnectionUnavailable {
            tenant: failed_for,
            attempts: made,
            last_error,
        } => {
            assert_eq!(*failed_for, tenant(5));
            assert_eq!(*made, attempts);
            assert!(last_error.contains("dead"));
        }
        other => panic!("expected ConnectionUnavailable, got {other:?}"),
    }
    assert!(err.is_resource_failure());
    assert_eq!(
        pool.connector().configure_calls() - calls_before,
        u64::from(attempts)
    );
    assert_eq!(pool.connector().resets(), u64::from(attempts - 1));

    // The dead connection is gone from every structure
    assert!(pool.recent_tenants().is_empty());
    let report = pool.report();
    assert!(report.recent.iter().all(|e| e.connection.id != dead_id));
    assert!(report.connections.iter().all(|c| c.id != dead_id));
    assert!(!pool.has_connections());

    // Once the database is back, a fresh connection is made
    pool.connector().fail_configure_always(false);
    let fresh = pool.acquire(tenant(5)).unwrap();
    assert_ne!(fresh.id(), dead_id);
}

#[test]
fn test_connect_failure_surfaces() {
    let pool = pool_with(ConnectionPoolConfig::default());
    pool.connector().fail_connect(true);
    assert!(matches!(
        pool.acquire(tenant(1)),
        Err(TenancyError::ConnectFailed { .. })
    ));
    assert!(!pool.has_connections());
}

#[test]
fn test_recent_map_bounded() {
    let config = ConnectionPoolConfig::for_test();
    let capacity = config.max_connections_in_recent;
    let pool = pool_with(config);

    for id in 0..20 {
        let info = pool.acquire(tenant(id)).unwrap();
        pool.release(info).unwrap();
        assert!(pool.recent_count() <= capacity);
    }
    assert_eq!(pool.recent_count(), capacity);
    assert_eq!(
        pool.recent_count() + pool.older_count(),
        pool.connection_count()
    );
}

#[test]
fn test_least_recently_used_evicted_to_front_of_older() {
    let config = ConnectionPoolConfig {
        max_connections_in_recent: 2,
        reuse_older_connections_threshold: 100,
        ..ConnectionPoolConfig::for_test()
    };
    let pool = pool_with(config);

    let a = pool.acquire(tenant(1)).unwrap();
    let b = pool.acquire(tenant(2)).unwrap();
    let c = pool.acquire(tenant(3)).unwrap();
    let a_id = a.id();
    pool.release(a).unwrap();
    pool.release(b).unwrap();
    pool.release(c).unwrap();

    // Tenant 1 had the oldest checkout, so it left the recent map
    assert_eq!(pool.recent_tenants(), vec![tenant(2), tenant(3)]);
    let report = pool.report();
    assert_eq!(report.older.first().map(|c| c.id), Some(a_id));

    // ...but its connection is still preferred for it
    assert_eq!(pool.acquire(tenant(1)).unwrap().id(), a_id);
}

#[test]
fn test_recent_entries_expire_by_age() {
    let config = ConnectionPoolConfig {
        max_checkouts_in_recent: 3,
        ..ConnectionPoolConfig::for_test()
    };
    let pool = pool_with(config);

    let old = pool.acquire(tenant(1)).unwrap();
    pool.release(old).unwrap();
    for _ in 0..5 {
        let info = pool.acquire(tenant(2)).unwrap();
        pool.release(info).unwrap();
    }
    assert_eq!(pool.recent_tenants(), vec![tenant(2)]);
    assert_eq!(pool.older_count(), 1);
}

#[test]
fn test_idle_connection_for_tenant_preferred_over_older_and_new() {
    let pool = pool_with(ConnectionPoolConfig::for_test());

    // Fill the older list so repurposing would be allowed
    let held: Vec<_> = (10..15).map(|id| pool.acquire(tenant(id)).unwrap()).collect();
    let x = pool.acquire(tenant(7)).unwrap();
    let x_id = x.id();
    for info in held {
        pool.release(info).unwrap();
    }
    pool.release(x).unwrap();
    let connects = pool.connector().connects();

    assert_eq!(pool.acquire(tenant(7)).unwrap().id(), x_id);
    assert_eq!(pool.connector().connects(), connects);
}

#[test]
fn test_older_connection_repurposed_once_threshold_reached() {
    let config = ConnectionPoolConfig {
        max_connections_in_recent: 1,
        reuse_older_connections_threshold: 2,
        ..ConnectionPoolConfig::for_test()
    };
    let pool = pool_with(config);

    let a = pool.acquire(tenant(1)).unwrap();
    let b = pool.acquire(tenant(2)).unwrap();
    let c = pool.acquire(tenant(3)).unwrap();
    pool.release(a).unwrap();
    pool.release(b).unwrap();
    pool.release(c).unwrap();
    assert_eq!(pool.older_count(), 2);
    let connects = pool.connector().connects();

    let repurposed = pool.acquire(tenant(4)).unwrap();
    assert_eq!(pool.connector().connects(), connects);
    assert_eq!(repurposed.tenants_seen().len(), 2);
    assert!(repurposed.has_served(tenant(4)));
}

#[test]
fn test_tenant_fan_out_bounded() {
    let config = ConnectionPoolConfig {
        max_connections_in_recent: 1,
        reuse_older_connections_threshold: 0,
        max_tenants_per_connection: 3,
        ..ConnectionPoolConfig::for_test()
    };
    let max = config.max_tenants_per_connection;
    let pool = pool_with(config);

    for round in 0..5 {
        for id in 0..12 {
            let info = pool.acquire(tenant(id)).unwrap();
            assert!(info.tenants_seen().len() <= max, "round {round}");
            pool.release(info).unwrap();
        }
    }
    let report = pool.report();
    for connection in report.older.iter().chain(report.recent.iter().map(|e| &e.connection)) {
        assert!(connection.tenants_seen.len() <= max);
    }
}

#[test]
fn test_concurrently_held_connections_are_distinct() {
    let pool = pool_with(ConnectionPoolConfig::for_test());
    let held: Vec<_> = (0..6).map(|id| pool.acquire(tenant(id % 2)).unwrap()).collect();
    let ids: HashSet<_> = held.iter().map(|c| c.id()).collect();
    assert_eq!(ids.len(), held.len());
    assert_eq!(pool.checked_out_count(), 6);

    let report = pool.report();
    assert_eq!(report.count(ConnectionState::Active), 6);
    for info in held {
        pool.release(info).unwrap();
    }
    assert!(!pool.report().has_bad_states());
}

#[test]
fn test_with_connection_always_releases() {
    let pool = pool_with(ConnectionPoolConfig::for_test());
    let configured = pool
        .with_connection(tenant(3), |conn| conn.configured_for)
        .unwrap();
    assert_eq!(configured, Some(tenant(3)));
    assert_eq!(pool.checked_out_count(), 0);
    assert_eq!(pool.recent_tenants(), vec![tenant(3)]);
}
