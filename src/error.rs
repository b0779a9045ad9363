//! # Error Types
//!
//! Errors raised by the tenancy layer, grouped the way callers need to react to them:
//!
//! - **Configuration errors**: programmer mistakes (no tenant selected, nested tenant
//!   contexts, registering caches after sealing). Never retried.
//! - **Resource failures**: a database connection could not be made to work for a tenant
//!   after the bounded number of re-validation attempts.
//! - **Lifecycle failures**: a cache instance's checkout/checkin hook failed. The instance is
//!   discarded, never pooled.
//! - **Pool invariant violations**: returning something that was never checked out.

use crate::config::ConfigurationError;
use crate::tenant::TenantHandle;
use std::fmt;
use thiserror::Error;

/// Result type for tenancy operations
pub type Result<T> = std::result::Result<T, TenancyError>;

/// Which cache lifecycle hook failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Checkout,
    Checkin,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Checkout => write!(f, "checkout"),
            LifecyclePhase::Checkin => write!(f, "checkin"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TenancyError {
    /// A connection or cache was requested outside of a tenant context
    #[error("No tenant selected")]
    NoTenantSelected,

    /// `enter` was called on a thread which already has an active tenant
    #[error("Already in a tenant context (current tenant: {current})")]
    AlreadyInTenantContext { current: TenantHandle },

    /// Caches only exist for real tenants, not for the "no tenant" handle
    #[error("No tenant state exists for the no-tenant handle; caches require a tenant")]
    NoTenantState,

    #[error("Cache registry is sealed, cannot register '{description}'")]
    RegistrySealed { description: String },

    #[error("Cache type '{description}' is already registered")]
    DuplicateCacheType { description: String },

    #[error("Invalid cache handle {index}")]
    InvalidCacheHandle { index: usize },

    /// The handle was issued by a different registry than the one in use
    #[error("Cache handle {index} was issued by another registry")]
    ForeignCacheHandle { index: usize },

    #[error("No tenant directory configured")]
    NoTenantDirectory,

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Every configure attempt failed, the connection has been discarded
    #[error("Couldn't get a working database connection for tenant {tenant} after {attempts} attempts: {last_error}")]
    ConnectionUnavailable {
        tenant: TenantHandle,
        attempts: u32,
        last_error: String,
    },

    #[error("Failed to open database connection: {source}")]
    ConnectFailed {
        #[source]
        source: anyhow::Error,
    },

    #[error("Cache '{description}' failed during {phase}: {source}")]
    CacheLifecycle {
        description: String,
        phase: LifecyclePhase,
        #[source]
        source: anyhow::Error,
    },

    #[error("Pool invariant violated: {message}")]
    PoolInvariant { message: String },

    #[error("Tenant directory failed: {source}")]
    TenantDirectory {
        #[source]
        source: anyhow::Error,
    },
}

impl TenancyError {
    /// Create a pool invariant error
    pub fn invariant<S: Into<String>>(message: S) -> Self {
        Self::PoolInvariant {
            message: message.into(),
        }
    }

    /// Create a connection-unavailable error after retries were exhausted
    pub fn connection_unavailable(tenant: TenantHandle, attempts: u32, last_error: &anyhow::Error) -> Self {
        Self::ConnectionUnavailable {
            tenant,
            attempts,
            last_error: format!("{last_error:#}"),
        }
    }

    /// Create a lifecycle callback error
    pub fn lifecycle<S: Into<String>>(description: S, phase: LifecyclePhase, source: anyhow::Error) -> Self {
        Self::CacheLifecycle {
            description: description.into(),
            phase,
            source,
        }
    }

    /// Programmer errors fail immediately and are never worth retrying
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::NoTenantSelected
                | Self::AlreadyInTenantContext { .. }
                | Self::NoTenantState
                | Self::RegistrySealed { .. }
                | Self::DuplicateCacheType { .. }
                | Self::InvalidCacheHandle { .. }
                | Self::ForeignCacheHandle { .. }
                | Self::NoTenantDirectory
                | Self::Configuration(_)
                | Self::PoolInvariant { .. }
        )
    }

    /// Failures of the underlying database resource
    pub fn is_resource_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectionUnavailable { .. } | Self::ConnectFailed { .. }
        )
    }
}
