//! Aggregate health over every registered database.
//!
//! Consumed by health-check endpoints: a per-name healthy flag plus an
//! overall verdict. Probing never errors; unreachable databases simply
//! report unhealthy.

use crate::backend::ConnectionStats;
use crate::config::BackendType;
use crate::manager::DatabaseManager;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Health detail for one logical database.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseHealth {
    pub healthy: bool,
    pub backend: BackendType,
    pub enabled: bool,
    pub connected: bool,
    /// Pool counters, present while connected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ConnectionStats>,
}

/// Status across all registered databases.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// True when every enabled database probes healthy. Disabled databases
    /// are reported per-name but do not fail the aggregate.
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
    pub databases: HashMap<String, DatabaseHealth>,
}

impl DatabaseManager {
    /// Probe every registered database and assemble the report.
    pub async fn health_report(&self) -> HealthReport {
        let checks = self.test_all_connections().await;
        let stats = self.stats().await;

        let mut databases = HashMap::with_capacity(checks.len());
        let mut healthy = true;

        for name in self.list_registered().await {
            let Some(config) = self.config(&name).await else {
                continue;
            };
            let probe_ok = checks.get(&name).copied().unwrap_or(false);
            if config.enabled && !probe_ok {
                healthy = false;
            }
            databases.insert(
                name.clone(),
                DatabaseHealth {
                    healthy: probe_ok,
                    backend: config.backend,
                    enabled: config.enabled,
                    connected: self.is_connected(&name).await,
                    stats: stats.get(&name).copied(),
                },
            );
        }

        HealthReport {
            healthy,
            checked_at: Utc::now(),
            databases,
        }
    }
}
