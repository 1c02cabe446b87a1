//! Transaction handles.
//!
//! A [`Transaction`] owns one session checked out from its backend's pool
//! for its whole lifetime. Statements issued through the handle run on that
//! session in order. Exactly one of `commit`/`rollback` consumes the handle;
//! either path (and a plain drop) returns the session to the pool - sqlx
//! rolls back and releases on drop, so an abandoned handle cannot leak the
//! session, but it is flagged in the log.

use crate::backend::{returns_rows, validate_routine_name};
use crate::config::BackendType;
use crate::error::{DatabaseError, DbResult};
use crate::sql::params::{bind_mysql, bind_postgres, bind_sqlite};
use crate::sql::results::{adapt_mysql_rows, adapt_postgres_rows, adapt_sqlite_rows};
use crate::sql::{BoundQuery, NamedParams, ParamValue, PlaceholderStyle, QueryResult, translate};
use sqlx::{MySql, Postgres, Sqlite};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

enum TxInner {
    MySql(sqlx::Transaction<'static, MySql>),
    Postgres(sqlx::Transaction<'static, Postgres>),
    Sqlite(sqlx::Transaction<'static, Sqlite>),
}

/// A transaction scoped to one dedicated session.
pub struct Transaction {
    id: String,
    database: String,
    backend: BackendType,
    /// Taken by commit/rollback; `Some` means still open.
    inner: Option<TxInner>,
    query_timeout: Duration,
}

impl Transaction {
    pub(crate) fn mysql(
        database: &str,
        tx: sqlx::Transaction<'static, MySql>,
        query_timeout: Duration,
    ) -> Self {
        Self::new(database, BackendType::MySql, TxInner::MySql(tx), query_timeout)
    }

    pub(crate) fn postgres(
        database: &str,
        tx: sqlx::Transaction<'static, Postgres>,
        query_timeout: Duration,
    ) -> Self {
        Self::new(
            database,
            BackendType::Postgres,
            TxInner::Postgres(tx),
            query_timeout,
        )
    }

    pub(crate) fn sqlite(
        database: &str,
        tx: sqlx::Transaction<'static, Sqlite>,
        query_timeout: Duration,
    ) -> Self {
        Self::new(
            database,
            BackendType::Sqlite,
            TxInner::Sqlite(tx),
            query_timeout,
        )
    }

    fn new(database: &str, backend: BackendType, inner: TxInner, query_timeout: Duration) -> Self {
        let id = format!("tx_{}", uuid::Uuid::new_v4().simple());
        info!(
            transaction_id = %id,
            database = %database,
            backend = %backend,
            "transaction started"
        );
        Self {
            id,
            database: database.to_string(),
            backend,
            inner: Some(inner),
            query_timeout,
        }
    }

    /// Identifier used in log lines about this transaction.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn backend_type(&self) -> BackendType {
        self.backend
    }

    /// Run a named-parameter statement on the dedicated session.
    pub async fn query(&mut self, sql: &str, params: &NamedParams) -> DbResult<QueryResult> {
        let database = self.database.clone();
        let backend = self.backend;
        let limit = self.query_timeout;
        let inner = self.inner.as_mut().ok_or_else(|| {
            DatabaseError::query_msg(&database, backend, "transaction already finished")
        })?;

        let result = match inner {
            TxInner::MySql(tx) => {
                let bound = translate(sql, params, PlaceholderStyle::Positional);
                let fut = async {
                    let mut query = sqlx::query(&bound.sql);
                    for value in &bound.values {
                        query = bind_mysql(query, value);
                    }
                    if returns_rows(&bound.sql) {
                        query.fetch_all(&mut **tx).await.map(|rows| adapt_mysql_rows(&rows))
                    } else {
                        query
                            .execute(&mut **tx)
                            .await
                            .map(|done| QueryResult::from_affected(done.rows_affected()))
                    }
                };
                run_with_timeout(fut, &bound, &database, backend, limit).await?
            }
            TxInner::Postgres(tx) => {
                let bound = translate(sql, params, PlaceholderStyle::Numbered);
                let fut = async {
                    let mut query = sqlx::query(&bound.sql);
                    for value in &bound.values {
                        query = bind_postgres(query, value);
                    }
                    if returns_rows(&bound.sql) {
                        query
                            .fetch_all(&mut **tx)
                            .await
                            .map(|rows| adapt_postgres_rows(&rows))
                    } else {
                        query
                            .execute(&mut **tx)
                            .await
                            .map(|done| QueryResult::from_affected(done.rows_affected()))
                    }
                };
                run_with_timeout(fut, &bound, &database, backend, limit).await?
            }
            TxInner::Sqlite(tx) => {
                let bound = translate(sql, params, PlaceholderStyle::Named);
                let fut = async {
                    let mut query = sqlx::query(&bound.sql);
                    for value in &bound.values {
                        query = bind_sqlite(query, value);
                    }
                    if returns_rows(&bound.sql) {
                        query
                            .fetch_all(&mut **tx)
                            .await
                            .map(|rows| adapt_sqlite_rows(&rows))
                    } else {
                        query
                            .execute(&mut **tx)
                            .await
                            .map(|done| QueryResult::from_affected(done.rows_affected()))
                    }
                };
                run_with_timeout(fut, &bound, &database, backend, limit).await?
            }
        };

        debug!(
            transaction_id = %self.id,
            database = %self.database,
            rows = result.row_count,
            "executed in transaction"
        );
        Ok(result)
    }

    /// Invoke a stored routine on the dedicated session, using the backend's
    /// calling convention.
    pub async fn execute(&mut self, routine: &str, args: &[ParamValue]) -> DbResult<QueryResult> {
        let database = self.database.clone();
        let backend = self.backend;
        let limit = self.query_timeout;
        if !validate_routine_name(routine) {
            return Err(DatabaseError::query_msg(
                &database,
                backend,
                format!("invalid routine name '{}'", routine),
            ));
        }
        let inner = self.inner.as_mut().ok_or_else(|| {
            DatabaseError::query_msg(&database, backend, "transaction already finished")
        })?;

        let result = match inner {
            TxInner::MySql(tx) => {
                let bound = BoundQuery {
                    sql: super::mysql::call_sql(routine, args.len()),
                    values: args.to_vec(),
                };
                let fut = async {
                    let mut query = sqlx::query(&bound.sql);
                    for value in &bound.values {
                        query = bind_mysql(query, value);
                    }
                    query.fetch_all(&mut **tx).await.map(|rows| adapt_mysql_rows(&rows))
                };
                run_with_timeout(fut, &bound, &database, backend, limit).await?
            }
            TxInner::Postgres(tx) => {
                let bound = BoundQuery {
                    sql: super::postgres::call_sql(routine, args.len()),
                    values: args.to_vec(),
                };
                let fut = async {
                    let mut query = sqlx::query(&bound.sql);
                    for value in &bound.values {
                        query = bind_postgres(query, value);
                    }
                    query
                        .fetch_all(&mut **tx)
                        .await
                        .map(|rows| adapt_postgres_rows(&rows))
                };
                run_with_timeout(fut, &bound, &database, backend, limit).await?
            }
            TxInner::Sqlite(tx) => {
                let bound = BoundQuery {
                    sql: super::sqlite::call_sql(routine, args.len()),
                    values: args.to_vec(),
                };
                let fut = async {
                    let mut query = sqlx::query(&bound.sql);
                    for value in &bound.values {
                        query = bind_sqlite(query, value);
                    }
                    query
                        .fetch_all(&mut **tx)
                        .await
                        .map(|rows| adapt_sqlite_rows(&rows))
                };
                run_with_timeout(fut, &bound, &database, backend, limit).await?
            }
        };

        debug!(
            transaction_id = %self.id,
            database = %self.database,
            routine = %routine,
            rows = result.row_count,
            "routine invoked in transaction"
        );
        Ok(result)
    }

    /// Commit and release the session. The session is returned to the pool
    /// even if the commit itself fails.
    pub async fn commit(mut self) -> DbResult<()> {
        let inner = self.take_inner("commit")?;
        let result = match inner {
            TxInner::MySql(tx) => tx.commit().await,
            TxInner::Postgres(tx) => tx.commit().await,
            TxInner::Sqlite(tx) => tx.commit().await,
        };
        match result {
            Ok(()) => {
                info!(transaction_id = %self.id, database = %self.database, "transaction committed");
                Ok(())
            }
            Err(e) => Err(DatabaseError::transaction(&self.database, self.backend, e)),
        }
    }

    /// Roll back and release the session. The session is returned to the
    /// pool even if the rollback itself fails.
    pub async fn rollback(mut self) -> DbResult<()> {
        let inner = self.take_inner("rollback")?;
        let result = match inner {
            TxInner::MySql(tx) => tx.rollback().await,
            TxInner::Postgres(tx) => tx.rollback().await,
            TxInner::Sqlite(tx) => tx.rollback().await,
        };
        match result {
            Ok(()) => {
                info!(transaction_id = %self.id, database = %self.database, "transaction rolled back");
                Ok(())
            }
            Err(e) => Err(DatabaseError::transaction(&self.database, self.backend, e)),
        }
    }

    fn take_inner(&mut self, op: &str) -> DbResult<TxInner> {
        self.inner.take().ok_or_else(|| {
            DatabaseError::query_msg(
                &self.database,
                self.backend,
                format!("{} on a finished transaction", op),
            )
        })
    }
}

async fn run_with_timeout<F>(
    fut: F,
    bound: &BoundQuery,
    database: &str,
    backend: BackendType,
    limit: Duration,
) -> DbResult<QueryResult>
where
    F: Future<Output = Result<QueryResult, sqlx::Error>>,
{
    match timeout(limit, fut).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(DatabaseError::query(database, backend, e)),
        Err(_) => Err(DatabaseError::query_msg(
            database,
            backend,
            format!(
                "statement timed out after {}s: {}",
                limit.as_secs(),
                bound.sql
            ),
        )),
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.inner.is_some() {
            // sqlx rolls the session back and returns it to the pool.
            warn!(
                transaction_id = %self.id,
                database = %self.database,
                "transaction dropped without commit or rollback; rolling back"
            );
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("database", &self.database)
            .field("backend", &self.backend)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_format() {
        let id = format!("tx_{}", uuid::Uuid::new_v4().simple());
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 3 + 32);
    }
}
