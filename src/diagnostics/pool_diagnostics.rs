//! # Connection Pool Diagnostics
//!
//! Point-in-time dump of the tenant-aware pool: the recently-used map, the older list, and
//! the state of every connection the pool knows about.
//!
//! The pool's two tiers are read under separate locks, so a connection moving between
//! them while the report is captured can show up as `A` or `L!` for that one report.

use crate::database::ConnectionInfo;
use crate::tenant::TenantHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

/// One connection as seen by a diagnostic report
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub id: Uuid,
    pub last_checkout: u64,
    pub owning_tenant: Option<TenantHandle>,
    pub owning_thread: Option<String>,
    pub tenants_seen: Vec<TenantHandle>,
    pub created_at: DateTime<Utc>,
}

impl ConnectionSummary {
    pub(crate) fn from_info<Conn>(info: &ConnectionInfo<Conn>) -> Self {
        Self {
            id: info.id(),
            last_checkout: info.last_checkout(),
            owning_tenant: info.owning_tenant(),
            owning_thread: info.owning_thread().map(|t| format!("{t:?}")),
            tenants_seen: info.tenants_seen().to_vec(),
            created_at: info.created_at(),
        }
    }
}

impl fmt::Display for ConnectionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owner = self
            .owning_tenant
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        let seen: Vec<String> = self.tenants_seen.iter().map(ToString::to_string).collect();
        write!(
            f,
            "{} {:>6} {:>9} [{}]",
            self.id,
            self.last_checkout,
            owner,
            seen.join(",")
        )
    }
}

/// Where a connection currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ConnectionState {
    /// In the recently-used map
    #[serde(rename = "r")]
    Recent,
    /// In the older list
    #[serde(rename = "o")]
    Older,
    /// Checked out by a unit of work
    #[serde(rename = "A")]
    Active,
    /// In both tiers at once
    #[serde(rename = "X!")]
    Duplicated,
    /// Known to the pool but neither pooled nor checked out
    #[serde(rename = "L!")]
    Lost,
}

impl ConnectionState {
    pub fn code(&self) -> &'static str {
        match self {
            ConnectionState::Recent => "r",
            ConnectionState::Older => "o",
            ConnectionState::Active => "A",
            ConnectionState::Duplicated => "X!",
            ConnectionState::Lost => "L!",
        }
    }

    pub fn is_bad(&self) -> bool {
        matches!(self, ConnectionState::Duplicated | ConnectionState::Lost)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.code())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentEntry {
    pub tenant: TenantHandle,
    pub connection: ConnectionSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStateEntry {
    pub id: Uuid,
    pub state: ConnectionState,
}

/// Occupancy report for a [`TenantAwarePool`](crate::database::TenantAwarePool)
#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub generated_at: DateTime<Utc>,
    pub pool_id: u64,
    pub checkout_counter: u64,
    pub recent: Vec<RecentEntry>,
    pub older: Vec<ConnectionSummary>,
    pub connections: Vec<ConnectionStateEntry>,
    pub state_counts: BTreeMap<ConnectionState, usize>,
}

impl PoolReport {
    pub(crate) fn build(
        pool_id: u64,
        checkout_counter: u64,
        mut recent: Vec<RecentEntry>,
        older: Vec<ConnectionSummary>,
        mut all: Vec<Uuid>,
        active: &HashSet<Uuid>,
    ) -> Self {
        recent.sort_by_key(|entry| entry.tenant);
        all.sort_unstable();

        let recent_ids: HashSet<Uuid> = recent.iter().map(|e| e.connection.id).collect();
        let older_ids: HashSet<Uuid> = older.iter().map(|c| c.id).collect();

        let mut state_counts = BTreeMap::new();
        let connections = all
            .into_iter()
            .map(|id| {
                let state = match (recent_ids.contains(&id), older_ids.contains(&id)) {
                    (true, true) => ConnectionState::Duplicated,
                    (true, false) => ConnectionState::Recent,
                    (false, true) => ConnectionState::Older,
                    (false, false) if active.contains(&id) => ConnectionState::Active,
                    (false, false) => ConnectionState::Lost,
                };
                *state_counts.entry(state).or_insert(0) += 1;
                ConnectionStateEntry { id, state }
            })
            .collect();

        Self {
            generated_at: Utc::now(),
            pool_id,
            checkout_counter,
            recent,
            older,
            connections,
            state_counts,
        }
    }

    pub fn count(&self, state: ConnectionState) -> usize {
        self.state_counts.get(&state).copied().unwrap_or(0)
    }

    pub fn total_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn has_bad_states(&self) -> bool {
        self.state_counts.keys().any(ConnectionState::is_bad)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Emit a one-line summary, escalating to `warn` when bad states are present
    pub fn log_summary(&self) {
        if self.has_bad_states() {
            warn!(
                pool_id = self.pool_id,
                duplicated = self.count(ConnectionState::Duplicated),
                lost = self.count(ConnectionState::Lost),
                "🏊 POOL: Connection pool has connections in a bad state"
            );
        } else {
            info!(
                pool_id = self.pool_id,
                checkout_counter = self.checkout_counter,
                recent = self.count(ConnectionState::Recent),
                older = self.count(ConnectionState::Older),
                active = self.count(ConnectionState::Active),
                "🏊 POOL: Connection pool healthy"
            );
        }
    }
}

impl fmt::Display for PoolReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "POOLED DATABASE CONNECTIONS (pool {})", self.pool_id)?;
        writeln!(f, "  Checkout counter = {}", self.checkout_counter)?;
        writeln!(f, "RECENTLY USED")?;
        writeln!(f, "  TENANT    ID{:34} LASTCO    OWNER TENANTS", "")?;
        for entry in &self.recent {
            writeln!(f, "  {:<9} {}", entry.tenant.to_string(), entry.connection)?;
        }
        writeln!(f, "OLDER CONNECTIONS")?;
        for connection in &self.older {
            writeln!(f, "  {connection}")?;
        }
        writeln!(f, "ALL CONNECTIONS")?;
        for entry in &self.connections {
            writeln!(f, "  {:<2} {}", entry.state, entry.id)?;
        }
        let counts: Vec<String> = self
            .state_counts
            .iter()
            .map(|(state, n)| format!("{state}={n}"))
            .collect();
        write!(f, "STATES {}", counts.join(" "))?;
        if self.has_bad_states() {
            write!(f, " (BAD STATES PRESENT)")?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: Uuid) -> ConnectionSummary {
        ConnectionSummary {
            id,
            last_checkout: 3,
            owning_tenant: None,
            owning_thread: None,
            tenants_seen: vec![TenantHandle::Tenant(1)],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_connection_states() {
        let (r, o, a, x, l) = (
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        let recent = vec![
            RecentEntry { tenant: TenantHandle::Tenant(1), connection: summary(r) },
            RecentEntry { tenant: TenantHandle::Tenant(2), connection: summary(x) },
        ];
        let older = vec![summary(o), summary(x)];
        let active: HashSet<Uuid> = [a].into_iter().collect();

        let report = PoolReport::build(1, 9, recent, older, vec![r, o, a, x, l], &active);
        assert_eq!(report.count(ConnectionState::Recent), 1);
        assert_eq!(report.count(ConnectionState::Older), 1);
        assert_eq!(report.count(ConnectionState::Active), 1);
        assert_eq!(report.count(ConnectionState::Duplicated), 1);
        assert_eq!(report.count(ConnectionState::Lost), 1);
        assert!(report.has_bad_states());

        let text = report.to_string();
        assert!(text.contains("Checkout counter = 9"));
        assert!(text.contains("X!"));
        let json = report.to_json().unwrap();
        assert!(json.contains("\"L!\""));
    }

    #[test]
    fn test_healthy_report() {
        let id = Uuid::new_v4();
        let report = PoolReport::build(
            2,
            1,
            vec![RecentEntry { tenant: TenantHandle::Tenant(5), connection: summary(id) }],
            Vec::new(),
            vec![id],
            &HashSet::new(),
        );
        assert!(!report.has_bad_states());
        assert_eq!(report.total_connections(), 1);
    }
}
