//! The connection registry.
//!
//! One `DatabaseManager` exists per process, constructed at startup and
//! passed to every consumer. It is the single writer of the
//! name-to-connection map. Connections are established lazily on first
//! `get`; concurrent first callers share one in-flight connect through a
//! per-name `OnceCell`, so a name can never grow two pools.

use crate::backend::{BackendConnection, ConnectionStats};
use crate::config::{ConfigError, DatabaseConfig};
use crate::error::{DatabaseError, DbResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};

type ConnectionCell = Arc<OnceCell<Arc<BackendConnection>>>;

#[derive(Debug, Default)]
pub struct DatabaseManager {
    configs: RwLock<HashMap<String, DatabaseConfig>>,
    connections: RwLock<HashMap<String, ConnectionCell>>,
}

impl DatabaseManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry pre-loaded from environment variables.
    pub async fn from_env() -> Result<Self, ConfigError> {
        let manager = Self::new();
        for config in crate::config::from_env()? {
            manager.register(config).await;
        }
        Ok(manager)
    }

    /// Store a configuration under its logical name. Overwrites are legal
    /// and logged; an existing live connection is left untouched until
    /// `disconnect`.
    pub async fn register(&self, config: DatabaseConfig) {
        let mut configs = self.configs.write().await;
        if configs.contains_key(&config.name) {
            warn!(database = %config.name, "overwriting existing database configuration");
        }
        info!(
            database = %config.name,
            backend = %config.backend,
            enabled = config.enabled,
            "registered database"
        );
        configs.insert(config.name.clone(), config);
    }

    /// Return the live connection for `name`, establishing it on first use.
    ///
    /// Sequentially and concurrently idempotent: every successful call for
    /// the same name yields the same `Arc`. A failed connect leaves nothing
    /// behind, so the next caller retries from scratch.
    pub async fn get(&self, name: &str) -> DbResult<Arc<BackendConnection>> {
        let config = {
            let configs = self.configs.read().await;
            match configs.get(name) {
                None => return Err(DatabaseError::not_configured(name)),
                Some(c) if !c.enabled => return Err(DatabaseError::disabled(name)),
                Some(c) => c.clone(),
            }
        };

        let cell = self.cell_for(name).await;

        let connection = cell
            .get_or_try_init(|| async {
                let connection = Arc::new(BackendConnection::from_config(config));
                connection.connect().await?;
                Ok::<_, DatabaseError>(connection)
            })
            .await?;

        Ok(Arc::clone(connection))
    }

    /// Fetch or create the per-name cell with a double-checked lock.
    async fn cell_for(&self, name: &str) -> ConnectionCell {
        {
            let cells = self.connections.read().await;
            if let Some(cell) = cells.get(name) {
                return Arc::clone(cell);
            }
        }
        let mut cells = self.connections.write().await;
        Arc::clone(
            cells
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }

    /// Whether a configuration is registered under this name.
    pub async fn has(&self, name: &str) -> bool {
        self.configs.read().await.contains_key(name)
    }

    /// Whether a live connection currently exists for this name.
    pub async fn is_connected(&self, name: &str) -> bool {
        self.connections
            .read()
            .await
            .get(name)
            .is_some_and(|cell| cell.get().is_some())
    }

    /// All registered names, sorted.
    pub async fn list_registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names with a live connection, sorted.
    pub async fn list_connected(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .connections
            .read()
            .await
            .iter()
            .filter(|(_, cell)| cell.get().is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Registered configuration for a name, if any.
    pub async fn config(&self, name: &str) -> Option<DatabaseConfig> {
        self.configs.read().await.get(name).cloned()
    }

    /// Probe one database. Every failure - unknown name, disabled, network -
    /// becomes `false` with a logged diagnostic; this path never errors.
    pub async fn test_connection(&self, name: &str) -> bool {
        match self.get(name).await {
            Ok(connection) => connection.test_connection().await,
            Err(e) => {
                warn!(database = %name, error = %e, "connection test failed");
                false
            }
        }
    }

    /// Probe every registered database. Disabled configurations report
    /// `false` without a connection attempt.
    pub async fn test_all_connections(&self) -> HashMap<String, bool> {
        let targets: Vec<(String, bool)> = {
            let configs = self.configs.read().await;
            configs
                .values()
                .map(|c| (c.name.clone(), c.enabled))
                .collect()
        };

        let mut results = HashMap::with_capacity(targets.len());
        for (name, enabled) in targets {
            let healthy = if enabled {
                self.test_connection(&name).await
            } else {
                false
            };
            results.insert(name, healthy);
        }
        results
    }

    /// Close and drop the connection for `name`. No-op when not connected.
    /// The configuration stays registered; the next `get` reconnects.
    pub async fn disconnect(&self, name: &str) {
        let removed = self.connections.write().await.remove(name);
        if let Some(cell) = removed {
            // A concurrent in-flight connect on this cell completes into the
            // removed cell; its pool dies with the last Arc. Cost is a
            // reconnect on the next get, not a correctness issue.
            if let Some(connection) = cell.get() {
                connection.disconnect().await;
            }
        }
    }

    /// Close every live connection. Configurations stay registered.
    pub async fn disconnect_all(&self) {
        let drained: Vec<(String, ConnectionCell)> = {
            let mut cells = self.connections.write().await;
            cells.drain().collect()
        };
        for (name, cell) in drained {
            if let Some(connection) = cell.get() {
                info!(database = %name, "closing connection");
                connection.disconnect().await;
            }
        }
        info!("all connections closed");
    }

    /// Pool counters for every currently connected name.
    pub async fn stats(&self) -> HashMap<String, ConnectionStats> {
        let live: Vec<(String, Arc<BackendConnection>)> = {
            let cells = self.connections.read().await;
            cells
                .iter()
                .filter_map(|(name, cell)| {
                    cell.get().map(|conn| (name.clone(), Arc::clone(conn)))
                })
                .collect()
        };

        let mut stats = HashMap::with_capacity(live.len());
        for (name, connection) in live {
            stats.insert(name, connection.stats().await);
        }
        stats
    }
}
