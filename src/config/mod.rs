//! # Tenancy Configuration
//!
//! Tunable thresholds for the tenant-aware connection pool, database schema naming and
//! logging. Every section has a `Default` matching the constants in
//! [`crate::constants`], so a configuration file only needs to name what it overrides.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tenancy_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let recent_capacity = manager.config().pool.max_connections_in_recent;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::{database, pool};
use crate::tenant::TenantHandle;
use serde::{Deserialize, Serialize};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring tenancy.toml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TenancyConfig {
    /// Connection pool thresholds
    pub pool: ConnectionPoolConfig,

    /// Database connection and schema naming
    pub database: DatabaseConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl TenancyConfig {
    /// Configuration with small pool thresholds so eviction paths are easy to reach
    pub fn for_test() -> Self {
        Self {
            pool: ConnectionPoolConfig::for_test(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.pool.validate()?;
        self.database.validate()?;
        Ok(())
    }
}

/// Thresholds governing connection reuse
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    /// Minimum length of the older list before connections are repurposed for new tenants
    pub reuse_older_connections_threshold: usize,
    /// Maximum number of distinct tenants one connection may serve
    pub max_tenants_per_connection: usize,
    /// Capacity of the recently-used map
    pub max_connections_in_recent: usize,
    /// Maximum age of a recently-used entry, measured in checkouts
    pub max_checkouts_in_recent: u64,
    /// Attempts at configuring a connection before it is declared dead
    pub max_configure_attempts: u32,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            reuse_older_connections_threshold: pool::REUSE_OLDER_CONNECTIONS_THRESHOLD,
            max_tenants_per_connection: pool::MAX_TENANTS_PER_CONNECTION,
            max_connections_in_recent: pool::MAX_CONNECTIONS_IN_RECENT,
            max_checkouts_in_recent: pool::MAX_CHECKOUTS_IN_RECENT,
            max_configure_attempts: pool::MAX_CONFIGURE_ATTEMPTS,
        }
    }
}

impl ConnectionPoolConfig {
    pub fn for_test() -> Self {
        Self {
            reuse_older_connections_threshold: 2,
            max_tenants_per_connection: 3,
            max_connections_in_recent: 4,
            max_checkouts_in_recent: 32,
            max_configure_attempts: 4,
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_tenants_per_connection == 0 {
            return Err(ConfigurationError::invalid_value(
                "pool.max_tenants_per_connection",
                "0",
                "a connection must be able to serve at least one tenant",
            ));
        }
        if self.max_connections_in_recent == 0 {
            return Err(ConfigurationError::invalid_value(
                "pool.max_connections_in_recent",
                "0",
                "the recently-used map needs room for at least one connection",
            ));
        }
        if self.max_checkouts_in_recent == 0 {
            return Err(ConfigurationError::invalid_value(
                "pool.max_checkouts_in_recent",
                "0",
                "must be greater than zero",
            ));
        }
        if self.max_configure_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "pool.max_configure_attempts",
                "0",
                "at least one configure attempt is required",
            ));
        }
        Ok(())
    }
}

/// Database connection and schema naming
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    /// Tenant `n` uses schema `<tenant_schema_prefix><n>`
    pub tenant_schema_prefix: String,
    /// Always appended to the search path
    pub shared_schema: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            tenant_schema_prefix: database::TENANT_SCHEMA_PREFIX.to_string(),
            shared_schema: database::SHARED_SCHEMA.to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Search path that scopes unqualified table names to the tenant's schema
    pub fn search_path_for(&self, tenant: TenantHandle) -> String {
        match tenant {
            TenantHandle::Tenant(id) => {
                format!("{}{},{}", self.tenant_schema_prefix, id, self.shared_schema)
            }
            TenantHandle::NoTenant => self.shared_schema.clone(),
        }
    }

    /// Database URL from configuration or `DATABASE_URL`
    pub fn database_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        // Names are interpolated into SET search_path, so only plain identifiers are allowed
        let is_identifier = |s: &str| {
            s.chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        };
        if !is_identifier(&self.tenant_schema_prefix) {
            return Err(ConfigurationError::invalid_value(
                "database.tenant_schema_prefix",
                self.tenant_schema_prefix.clone(),
                "must be a plain SQL identifier",
            ));
        }
        if !is_identifier(&self.shared_schema) {
            return Err(ConfigurationError::invalid_value(
                "database.shared_schema",
                self.shared_schema.clone(),
                "must be a plain SQL identifier",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; falls back to an environment-based default
    pub level: Option<String>,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}
