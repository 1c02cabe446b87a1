//! MySQL backend: positional `?` placeholders, `CALL` routine invocation.

use crate::backend::transaction::Transaction;
use crate::backend::{ConnectionStats, returns_rows, validate_routine_name};
use crate::config::{BackendType, DatabaseConfig};
use crate::error::{DatabaseError, DbResult};
use crate::sql::params::bind_mysql;
use crate::sql::results::adapt_mysql_rows;
use crate::sql::{BoundQuery, NamedParams, ParamValue, PlaceholderStyle, QueryResult, translate};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::{Executor, MySqlPool};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const BACKEND: BackendType = BackendType::MySql;

#[derive(Debug)]
pub struct MySqlConnection {
    config: DatabaseConfig,
    /// Present only while connected.
    pool: RwLock<Option<MySqlPool>>,
}

impl MySqlConnection {
    pub(crate) fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Build the pool and probe it. No-op when already connected.
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
        let options = MySqlConnectOptions::from_str(&url)
            .map_err(|e| DatabaseError::connection(self.name(), BACKEND, e))?
            .charset("utf8mb4");

        let pool = MySqlPoolOptions::new()
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

        info!(database = %self.name(), url = %self.config.masked_url(), "connected to MySQL");
        *guard = Some(pool);
        Ok(())
    }

    /// Close and clear the pool. Safe when already disconnected.
    pub(crate) async fn disconnect(&self) {
        let taken = self.pool.write().await.take();
        if let Some(pool) = taken {
            pool.close().await;
            info!(database = %self.name(), "disconnected from MySQL");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.pool.read().await.is_some()
    }

    async fn ensure_pool(&self) -> DbResult<MySqlPool> {
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
        let bound = translate(sql, params, PlaceholderStyle::Positional);
        debug!(database = %self.name(), sql = %bound.sql, params = bound.values.len(), "executing query");

        let limit = self.config.pool.query_timeout();
        if returns_rows(&bound.sql) {
            let rows = self.fetch_rows(&pool, &bound, limit).await?;
            Ok(adapt_mysql_rows(&rows))
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
        debug!(database = %self.name(), routine = %routine, "calling procedure");

        let limit = self.config.pool.query_timeout();
        let rows = self.fetch_rows(&pool, &bound, limit).await?;
        Ok(adapt_mysql_rows(&rows))
    }

    pub async fn begin(&self) -> DbResult<Transaction> {
        let pool = self.ensure_pool().await?;
        let tx = pool
            .begin()
            .await
            .map_err(|e| DatabaseError::transaction(self.name(), BACKEND, e))?;
        Ok(Transaction::mysql(
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
        pool: &MySqlPool,
        bound: &BoundQuery,
        limit: Duration,
    ) -> DbResult<Vec<MySqlRow>> {
        // Parameterless statements run unprepared; some statements reject
        // the prepared path entirely.
        let fut = async {
            if bound.values.is_empty() {
                pool.fetch_all(bound.sql.as_str()).await
            } else {
                let mut query = sqlx::query(&bound.sql);
                for value in &bound.values {
                    query = bind_mysql(query, value);
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
        pool: &MySqlPool,
        bound: &BoundQuery,
        limit: Duration,
    ) -> DbResult<u64> {
        let fut = async {
            if bound.values.is_empty() {
                pool.execute(bound.sql.as_str()).await
            } else {
                let mut query = sqlx::query(&bound.sql);
                for value in &bound.values {
                    query = bind_mysql(query, value);
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
    format!("CALL {}({})", routine, placeholders)
}
