use proptest::prelude::*;

/// One step against the connection pool
#[derive(Debug, Clone)]
pub enum PoolOp {
    Acquire(u32),
    /// Release the held connection at this index, modulo the number held
    Release(usize),
}

pub fn pool_op_strategy(tenants: u32) -> impl Strategy<Value = PoolOp> {
    prop_oneof![
        (0..tenants).prop_map(PoolOp::Acquire),
        any::<usize>().prop_map(PoolOp::Release),
    ]
}

pub fn pool_ops_strategy() -> impl Strategy<Value = Vec<PoolOp>> {
    prop::collection::vec(pool_op_strategy(8), 1..120)
}

/// One step of a unit of work against a single tenant's cache slot
#[derive(Debug, Clone)]
pub enum CacheOp {
    Checkout(usize),
    Invalidate(usize),
    Checkin(usize),
}

pub fn cache_ops_strategy(workers: usize) -> impl Strategy<Value = Vec<CacheOp>> {
    let op = prop_oneof![
        3 => (0..workers).prop_map(CacheOp::Checkout),
        1 => (0..workers).prop_map(CacheOp::Invalidate),
        2 => (0..workers).prop_map(CacheOp::Checkin),
    ];
    prop::collection::vec(op, 1..80)
}
