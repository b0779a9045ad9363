//! # Registry Infrastructure
//!
//! Startup-time registration of tenant cache types.
//!
//! ## Overview
//!
//! Every kind of per-tenant cache is registered once, before the process starts serving
//! work, and receives a stable [`CacheHandle`]. Registration is write-once/read-many:
//! once the registry is sealed (by building a [`Runtime`](crate::execution::Runtime)),
//! lookups need no locking.
//!
//! ## Architecture
//!
//! ```text
//! Registry Infrastructure
//! ├── CacheRegistry     (ordered list of cache type descriptors)
//! ├── CacheHandle<T>    (typed index into the registry)
//! └── TenantCache       (lifecycle hooks implemented by cache objects)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use std::collections::HashMap;
//! use tenancy_core::registry::{CacheRegistry, SharingMode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = CacheRegistry::new();
//! let titles = registry.register(
//!     "Object titles",
//!     SharingMode::PerThread,
//!     HashMap::<u64, String>::new,
//! )?;
//! assert_eq!(titles.index(), 0);
//! # Ok(())
//! # }
//! ```

pub mod cache_registry;

pub use cache_registry::{CacheHandle, CacheRegistry, CacheType, SharingMode, TenantCache};

pub(crate) use cache_registry::AnyCache;
