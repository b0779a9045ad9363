//! PostgreSQL connector: one schema per tenant, selected through `search_path`.
//!
//! The pool is synchronous, so the connector owns a small tokio runtime and blocks on
//! sqlx futures. Do not call it from inside another tokio runtime's worker threads.

use crate::config::{ConfigurationError, DatabaseConfig};
use crate::database::connection::TenantConnector;
use crate::error::{Result, TenancyError};
use crate::tenant::TenantHandle;
use anyhow::Context;
use sqlx::{Connection, Executor, PgConnection};
use tokio::runtime::Runtime;
use tracing::{debug, warn};

pub struct PgTenantConnector {
    runtime: Runtime,
    url: String,
    database: DatabaseConfig,
}

impl PgTenantConnector {
    /// Build a connector from configuration, falling back to `DATABASE_URL`
    pub fn new(database: DatabaseConfig) -> Result<Self> {
        let url = database.database_url().ok_or_else(|| {
            ConfigurationError::invalid_value(
                "database.url",
                "<unset>",
                "set database.url or DATABASE_URL",
            )
        })?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TenancyError::ConnectFailed {
                source: anyhow::Error::new(e).context("failed to start connector runtime"),
            })?;
        Ok(Self {
            runtime,
            url,
            database,
        })
    }

    pub fn database(&self) -> &DatabaseConfig {
        &self.database
    }
}

impl TenantConnector for PgTenantConnector {
    type Connection = PgConnection;

    fn connect(&self) -> anyhow::Result<PgConnection> {
        self.runtime
            .block_on(PgConnection::connect(&self.url))
            .context("failed to connect to PostgreSQL")
    }

    fn configure(&self, connection: &mut PgConnection, tenant: TenantHandle) -> anyhow::Result<()> {
        let statement = format!("SET search_path TO {}", self.database.search_path_for(tenant));
        debug!(tenant = %tenant, statement = %statement, "🐘 PG: Configuring connection");
        self.runtime
            .block_on(connection.execute(statement.as_str()))
            .with_context(|| format!("failed to set search path for tenant {tenant}"))?;
        Ok(())
    }

    fn reset(&self, connection: &mut PgConnection) -> anyhow::Result<()> {
        if self.runtime.block_on(connection.ping()).is_ok() {
            return Ok(());
        }
        warn!("🐘 PG: Connection failed ping, reconnecting");
        *connection = self.connect()?;
        Ok(())
    }

    fn abort(&self, connection: &mut PgConnection) -> anyhow::Result<()> {
        self.runtime
            .block_on(connection.execute("ROLLBACK"))
            .context("failed to roll back")?;
        Ok(())
    }
}

impl std::fmt::Debug for PgTenantConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTenantConnector")
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}
