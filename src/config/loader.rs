//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are merged in order, later ones
//! overriding earlier ones:
//!
//! 1. `tenancy.{toml,yaml,json}` in the configuration directory (optional)
//! 2. `tenancy.<environment>.{toml,yaml,json}` (optional)
//! 3. `TENANCY__<SECTION>__<FIELD>` environment variables

use super::error::{ConfigResult, ConfigurationError};
use super::TenancyConfig;
use crate::constants::system;
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Loaded, validated configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: TenancyConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = crate::logging::get_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            config_directory = %config_directory.display(),
            max_connections_in_recent = config.pool.max_connections_in_recent,
            max_tenants_per_connection = config.pool.max_tenants_per_connection,
            "⚙️ CONFIG: Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, validating it
    pub fn from_config(config: TenancyConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn default_config_directory() -> PathBuf {
        std::env::var("TENANCY_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn load_and_merge_config(directory: &Path, environment: &str) -> ConfigResult<TenancyConfig> {
        let base = directory.join(system::CONFIG_FILE_STEM);
        let overrides = directory.join(format!("{}.{}", system::CONFIG_FILE_STEM, environment));

        let merged = Config::builder()
            .add_source(File::with_name(&base.to_string_lossy()).required(false))
            .add_source(File::with_name(&overrides.to_string_lossy()).required(false))
            .add_source(
                Environment::with_prefix(system::CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::load_failed(directory.to_path_buf(), e))?;

        merged
            .try_deserialize::<TenancyConfig>()
            .map_err(ConfigurationError::deserialize_failed)
    }
}
