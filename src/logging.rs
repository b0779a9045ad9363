//! # Structured Logging Module
//!
//! Environment-aware structured logging for pool and cache lifecycle events. The host
//! application may install its own `tracing` subscriber first; in that case initialization
//! here is a no-op and events flow to the host's subscriber.

use crate::config::LoggingConfig;
use crate::constants::system;
use crate::tenant::TenantHandle;
use chrono::Utc;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging using the environment defaults
pub fn init_structured_logging() {
    init_structured_logging_with(&LoggingConfig::default());
}

/// Initialize structured logging with explicit settings
pub fn init_structured_logging_with(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = std::env::var("TENANCY_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| {
                config
                    .level
                    .clone()
                    .unwrap_or_else(|| get_log_level(&environment))
            });

        let console_layer = if config.json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(log_level.clone()))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(log_level.clone()))
                .boxed()
        };

        // Use try_init to avoid panic if global subscriber already set
        if tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            level = %log_level,
            json = config.json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
pub(crate) fn get_environment() -> String {
    std::env::var(system::ENVIRONMENT_VAR)
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| system::DEFAULT_ENVIRONMENT.to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for connection pool operations
pub fn log_pool_operation(
    operation: &str,
    tenant: TenantHandle,
    connection_id: Option<&uuid::Uuid>,
    status: &str,
    details: Option<&str>,
) {
    tracing::debug!(
        operation = %operation,
        tenant = %tenant,
        connection_id = connection_id.map(|id| id.to_string()),
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🏊 POOL_OPERATION"
    );
}

/// Log structured data for cache operations
pub fn log_cache_operation(
    operation: &str,
    tenant: TenantHandle,
    cache: &str,
    serial: Option<u64>,
    status: &str,
) {
    tracing::debug!(
        operation = %operation,
        tenant = %tenant,
        cache = %cache,
        serial = serial,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "🗃️ CACHE_OPERATION"
    );
}

/// Log structured data for tenant context changes
pub fn log_tenant_operation(operation: &str, tenant: TenantHandle, details: Option<&str>) {
    tracing::debug!(
        operation = %operation,
        tenant = %tenant,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🏢 TENANT_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &dyn std::fmt::Display, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
