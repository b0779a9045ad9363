//! # Tenant Cache Checkout
//!
//! The lease protocol for per-tenant cache objects.
//!
//! A unit of work checks out at most one instance of each cache type. Per-thread
//! instances come from the tenant's pool (or the factory) and go back at the end of the
//! unit of work, but only if the slot's serial number has not moved on in the meantime.
//! Shared instances are never removed from the tenant slot.
//!
//! ```text
//! checkout ──▶ CacheCheckoutTable ──▶ checkin_all
//!    │              ▲                     │
//!    ▼              │ on_invalidated      ▼
//! TenantState ◀── invalidate        serial matches? ──▶ pooled
//! ```

pub mod checkout;

pub use checkout::{CacheCheckoutTable, CacheRef, CheckinReport};
