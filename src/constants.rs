//! # System Constants
//!
//! Default thresholds for the tenant-aware connection pool and naming defaults for
//! tenant schemas. Every threshold here can be overridden through
//! [`ConnectionPoolConfig`](crate::config::ConnectionPoolConfig); the values are small and
//! bounded rather than derived from anything in particular.

/// Connection pool thresholds
pub mod pool {
    /// The older list must hold at least this many connections before one is repurposed
    /// for a tenant it has never served.
    pub const REUSE_OLDER_CONNECTIONS_THRESHOLD: usize = 8;

    /// Upper bound on the number of distinct tenants a single connection may serve.
    pub const MAX_TENANTS_PER_CONNECTION: usize = 12;

    /// Capacity of the recently-used map.
    pub const MAX_CONNECTIONS_IN_RECENT: usize = 16;

    /// Entries in the recently-used map older than this many checkouts are moved to the
    /// older list.
    pub const MAX_CHECKOUTS_IN_RECENT: u64 = 1024;

    /// Number of times configuring a connection for a tenant is attempted before giving up.
    pub const MAX_CONFIGURE_ATTEMPTS: u32 = 16;
}

/// Database naming
pub mod database {
    /// Tenant `n` lives in schema `<prefix><n>`
    pub const TENANT_SCHEMA_PREFIX: &str = "a";

    /// Schema always appended to the search path, and the only one for "no tenant"
    pub const SHARED_SCHEMA: &str = "public";
}

/// System-wide settings
pub mod system {
    pub const TENANCY_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Environment variable selecting the configuration environment
    pub const ENVIRONMENT_VAR: &str = "TENANCY_ENV";

    /// Prefix for configuration overrides from the environment
    pub const CONFIG_ENV_PREFIX: &str = "TENANCY";

    /// Base name of configuration files
    pub const CONFIG_FILE_STEM: &str = "tenancy";

    pub const DEFAULT_ENVIRONMENT: &str = "development";
}
