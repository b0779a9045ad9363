#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tenancy Core
//!
//! Multi-tenant resource lifecycle layer: tenant-correct database connections and
//! tenant-scoped caches for every unit of work, shared across many tenants and threads.
//!
//! ## Overview
//!
//! A host application builds one [`Runtime`](execution::Runtime) at startup. Every request
//! (or job) then runs inside an [`ExecutionContext`](execution::ExecutionContext) for one
//! tenant, which hands out:
//!
//! - a database connection already configured for the tenant, taken from a pool that
//!   prefers connections the tenant used recently and bounds how many tenants share one
//!   physical connection;
//! - per-tenant cache objects, leased per thread or shared per tenant, with serial-number
//!   invalidation so a stale cache never re-enters the pool.
//!
//! When the unit of work ends, on every exit path, caches are checked in and the
//! connection goes back to the pool.
//!
//! ## Module Organization
//!
//! - [`execution`] - `Runtime`, `ExecutionContext`, tenant iteration
//! - [`database`] - tenant-aware connection pool and connectors
//! - [`registry`] - startup-time cache type registration
//! - [`cache`] - cache checkout, invalidation and checkin
//! - [`tenant`] - tenant handles and per-tenant state
//! - [`config`] - configuration loading
//! - [`diagnostics`] - pool and cache occupancy reports
//! - [`error`] - structured error handling
//! - [`logging`] - structured logging setup
//!
//! ## Quick Start
//!
//! ```rust
//! use tenancy_core::execution::Runtime;
//! use tenancy_core::registry::SharingMode;
//! use tenancy_core::test_helpers::MockConnector;
//! use tenancy_core::{TenancyError, TenantHandle};
//!
//! # fn main() -> Result<(), TenancyError> {
//! let mut builder = Runtime::builder(MockConnector::new());
//! let recent_searches = builder.register_cache(
//!     "Recent searches",
//!     SharingMode::PerThread,
//!     Vec::<String>::new,
//! )?;
//! let runtime = builder.build()?;
//!
//! runtime.enter(TenantHandle::Tenant(42), |ctx| {
//!     let connection = ctx.connection()?;
//!     assert_eq!(connection.configured_for, Some(TenantHandle::Tenant(42)));
//!
//!     let mut searches = ctx.cache(&recent_searches)?;
//!     if let Some(searches) = searches.get_mut() {
//!         searches.push("invoices".to_string());
//!     }
//!     Ok::<_, TenancyError>(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod database;
pub mod diagnostics;
pub mod error;
pub mod execution;
pub mod logging;
pub mod registry;
pub mod tenant;
pub mod test_helpers;

pub use config::{ConfigManager, ConnectionPoolConfig, DatabaseConfig, TenancyConfig};
pub use constants::system;
pub use database::{ConnectionInfo, TenantAwarePool, TenantConnector};
pub use error::{Result, TenancyError};
pub use execution::{ExecutionContext, Runtime, RuntimeBuilder, TenantDirectory};
pub use logging::init_structured_logging;
pub use registry::{CacheHandle, CacheRegistry, SharingMode, TenantCache};
pub use tenant::TenantHandle;
