//! # Execution
//!
//! Units of work and the runtime that serves them.
//!
//! ## Architecture
//!
//! ```text
//! Runtime ──begin/enter──▶ ExecutionContext ──connection()──▶ TenantAwarePool
//!    │                           │
//!    │                           └──cache(handle)──▶ CacheCheckoutTable ──▶ TenantState
//!    └──for_each_tenant──▶ TenantDirectory
//! ```
//!
//! Exactly one unit of work may be active per thread. Teardown order is fixed: the
//! thread's tenant binding is cleared, the connection is released (after an abort if the
//! unit of work failed), then caches are checked in.
//!
//! ## Usage
//!
//! ```rust
//! use std::collections::HashMap;
//! use tenancy_core::execution::Runtime;
//! use tenancy_core::registry::SharingMode;
//! use tenancy_core::test_helpers::MockConnector;
//! use tenancy_core::{TenancyError, TenantHandle};
//!
//! # fn main() -> Result<(), TenancyError> {
//! let mut builder = Runtime::builder(MockConnector::new());
//! let titles = builder.register_cache(
//!     "Object titles",
//!     SharingMode::PerThread,
//!     HashMap::<u64, String>::new,
//! )?;
//! let runtime = builder.build()?;
//!
//! runtime.enter(TenantHandle::Tenant(7), |ctx| {
//!     ctx.connection()?;
//!     let mut cache = ctx.cache(&titles)?;
//!     if let Some(titles) = cache.get_mut() {
//!         titles.insert(1, "Welcome".to_string());
//!     }
//!     Ok::<_, TenancyError>(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod directory;
pub mod runtime;

pub use context::{ConnectionOutcome, ExecutionContext, TeardownReport};
pub use directory::TenantDirectory;
pub use runtime::{Runtime, RuntimeBuilder};
