//! # Database Connections
//!
//! Tenant-aware pooling of database connections.
//!
//! ## Overview
//!
//! - [`connection`] - the [`TenantConnector`] seam and per-connection bookkeeping
//! - [`pool`] - the two-tier (recently-used / older) [`TenantAwarePool`]
//! - `postgres` - [`PgTenantConnector`](postgres::PgTenantConnector), schema-per-tenant
//!   over sqlx (feature `postgres`)
//!
//! ## Example Usage
//!
//! ```rust
//! use tenancy_core::config::ConnectionPoolConfig;
//! use tenancy_core::database::TenantAwarePool;
//! use tenancy_core::test_helpers::MockConnector;
//! use tenancy_core::TenantHandle;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = TenantAwarePool::new(MockConnector::new(), ConnectionPoolConfig::default());
//! let connection = pool.acquire(TenantHandle::Tenant(5))?;
//! let id = connection.id();
//! pool.release(connection)?;
//!
//! // The same tenant gets its warm connection back
//! assert_eq!(pool.acquire(TenantHandle::Tenant(5))?.id(), id);
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod pool;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use connection::{ConnectionInfo, TenantConnector};
pub use pool::{PooledConnection, TenantAwarePool};
#[cfg(feature = "postgres")]
pub use postgres::PgTenantConnector;
