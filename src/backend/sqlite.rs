//! SQLite backend: native `:name` placeholders, file-backed pool.
//!
//! SQLite binds named parameters itself, so templates keep their markers;
//! values are handed over in first-appearance order, one per distinct name.
//! Routine invocation targets table-valued functions
//! (`SELECT * FROM json_each(...)` and friends); SQLite has no stored
//! procedures.

use crate::backend::transaction::Transaction;
use crate::backend::{ConnectionStats, returns_rows, validate_routine_name};
use crate::config::{BackendType, DatabaseConfig};
use crate::error::{DatabaseError, DbResult};
use crate::sql::params::bind_sqlite;
use crate::sql::results::adapt_sqlite_rows;
use crate::sql::{BoundQuery, NamedParams, ParamValue, PlaceholderStyle, QueryResult, translate};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const BACKEND: BackendType = BackendType::Sqlite;

#[derive(Debug)]
pub struct SqliteConnection {
    config: DatabaseConfig,
    /// Present only while connected.
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteConnection {
    pub(crate) fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Open the database file and probe it. No-op when already connected.
    pub(crate) async fn connect(&self) -> DbResult<()> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            debug!(database = %self.name(), "already connected");
            return Ok(());
        }

        let url = self
            .config
            .url()
            .map_err(|e| DatabaseError::connection_msg(self.name(), BACKEND, e.to_string()))?;
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| DatabaseError::connection(self.name(), BACKEND, e))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(self.config.pool.min_connections_or_default())
            .max_connections(self.config.pool.max_connections_or_default(BACKEND))
            .acquire_timeout(self.config.pool.acquire_timeout())
            .idle_timeout(Some(self.config.pool.idle_timeout()))
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::connection(self.name(), BACKEND, e))?;

        // Liveness round trip before the connection counts as established.
        if let Err(e) = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&pool)
            .await
        {
            pool.close().await;
            return Err(DatabaseError::connection(self.name(), BACKEND, e));
        }

        info!(database = %self.name(), path = %self.config.database, "opened SQLite database");
        *guard = Some(pool);
        Ok(())
    }

    /// Close and clear the pool. Safe when already disconnected.
    pub(crate) async fn disconnect(&self) {
        let taken = self.pool.write().await.take();
        if let Some(pool) = taken {
            pool.close().await;
            info!(database = %self.name(), "closed SQLite database");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.pool.read().await.is_some()
    }

    async fn ensure_pool(&self) -> DbResult<SqlitePool> {
        if let Some(pool) = self.pool.read().await.as_ref() {
            return Ok(pool.clone());
        }
        self.connect().await?;
        self.pool.read().await.as_ref().cloned().ok_or_else(|| {
            DatabaseError::connection_msg(self.name(), BACKEND, "connection lost during setup")
        })
    }

    pub async fn query(&self, sql: &str, params: &NamedParams) -> DbResult<QueryResult> {
        let pool = self.ensure_pool().await?;
        // Markers survive; SQLite resolves them natively.
        let bound = translate(sql, params, PlaceholderStyle::Named);
        debug!(database = %self.name(), sql = %bound.sql, params = bound.values.len(), "executing query");

        let limit = self.config.pool.query_timeout();
        if returns_rows(&bound.sql) {
            let rows = self.fetch_rows(&pool, &bound, limit).await?;
            Ok(adapt_sqlite_rows(&rows))
        } else {
            let affected = self.run_statement(&pool, &bound, limit).await?;
            Ok(QueryResult::from_affected(affected))
        }
    }

    pub async fn execute(&self, routine: &str, args: &[ParamValue]) -> DbResult<QueryResult> {
        if !validate_routine_name(routine) {
            return Err(DatabaseError::query_msg(
                self.name(),
                BACKEND,
                format!("invalid routine name '{}'", routine),
            ));
        }
        let pool = self.ensure_pool().await?;
        let bound = BoundQuery {
            sql: call_sql(routine, args.len()),
            values: args.to_vec(),
        };
        debug!(database = %self.name(), routine = %routine, "calling table-valued function");

        let limit = self.config.pool.query_timeout();
        let rows = self.fetch_rows(&pool, &bound, limit).await?;
        Ok(adapt_sqlite_rows(&rows))
    }

    pub async fn begin(&self) -> DbResult<Transaction> {
        let pool = self.ensure_pool().await?;
        let tx = pool
            .begin()
            .await
            .map_err(|e| DatabaseError::transaction(self.name(), BACKEND, e))?;
        Ok(Transaction::sqlite(
            self.name(),
            tx,
            self.config.pool.query_timeout(),
        ))
    }

    pub async fn test_connection(&self) -> bool {
        let probe = async {
            let pool = self.ensure_pool().await?;
            sqlx::query_scalar::<_, i64>("SELECT 1")
                .fetch_one(&pool)
                .await
                .map_err(|e| DatabaseError::query(self.name(), BACKEND, e))
        };
        match probe.await {
            Ok(1) => true,
            Ok(other) => {
                warn!(database = %self.name(), value = other, "health probe returned unexpected value");
                false
            }
            Err(e) => {
                warn!(database = %self.name(), error = %e, "health probe failed");
                false
            }
        }
    }

    pub async fn stats(&self) -> ConnectionStats {
        match self.pool.read().await.as_ref() {
            Some(pool) => {
                let total = pool.size();
                let idle = pool.num_idle() as u32;
                ConnectionStats {
                    active: total.saturating_sub(idle),
                    idle,
                    total,
                    waiting: 0,
                }
            }
            None => ConnectionStats::default(),
        }
    }

    async fn fetch_rows(
        &self,
        pool: &SqlitePool,
        bound: &BoundQuery,
        limit: Duration,
    ) -> DbResult<Vec<SqliteRow>> {
        let fut = async {
            if bound.values.is_empty() {
                pool.fetch_all(bound.sql.as_str()).await
            } else {
                let mut query = sqlx::query(&bound.sql);
                for value in &bound.values {
                    query = bind_sqlite(query, value);
                }
                query.fetch_all(pool).await
            }
        };
        match timeout(limit, fut).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(e)) => Err(DatabaseError::query(self.name(), BACKEND, e)),
            Err(_) => Err(self.timeout_error(limit)),
        }
    }

    async fn run_statement(
        &self,
        pool: &SqlitePool,
        bound: &BoundQuery,
        limit: Duration,
    ) -> DbResult<u64> {
        let fut = async {
            if bound.values.is_empty() {
                pool.execute(bound.sql.as_str()).await
            } else {
                let mut query = sqlx::query(&bound.sql);
                for value in &bound.values {
                    query = bind_sqlite(query, value);
                }
                query.execute(pool).await
            }
        };
        match timeout(limit, fut).await {
            Ok(Ok(done)) => Ok(done.rows_affected()),
            Ok(Err(e)) => Err(DatabaseError::query(self.name(), BACKEND, e)),
            Err(_) => Err(self.timeout_error(limit)),
        }
    }

    fn timeout_error(&self, limit: Duration) -> DatabaseError {
        DatabaseError::query_msg(
            self.name(),
            BACKEND,
            format!("statement timed out after {}s", limit.as_secs()),
        )
    }
}

pub(crate) fn call_sql(routine: &str, argc: usize) -> String {
    let placeholders = vec!["?"; argc].join(", ");
    format!("SELECT * FROM {}({})", routine, placeholders)
}
