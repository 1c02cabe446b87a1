//! Backend connections.
//!
//! One variant per engine, each owning its native sqlx pool and speaking its
//! own placeholder and routine-call dialect. The [`BackendConnection`] enum
//! is the single capability surface callers see; variants are selected from
//! [`BackendType`] at construction time and never change afterwards.

pub mod mysql;
pub mod postgres;
pub mod sqlite;
pub mod transaction;

use crate::config::{BackendType, DatabaseConfig};
use crate::error::DbResult;
use crate::sql::{NamedParams, ParamValue, QueryResult};
use serde::Serialize;

pub use mysql::MySqlConnection;
pub use postgres::PostgresConnection;
pub use sqlite::SqliteConnection;
pub use transaction::Transaction;

/// Best-effort pool counters.
///
/// sqlx exposes pool size and idle count; `waiting` has no native counter
/// and is reported as zero rather than estimated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub active: u32,
    pub idle: u32,
    pub total: u32,
    pub waiting: u32,
}

/// A live (or lazily connectable) connection to one logical database.
///
/// Constructed only by the registry; callers obtain it via
/// `DatabaseManager::get` and use the query/execute/transaction surface.
#[derive(Debug)]
pub enum BackendConnection {
    MySql(MySqlConnection),
    Postgres(PostgresConnection),
    Sqlite(SqliteConnection),
}

impl BackendConnection {
    /// Factory keyed on the configured backend type. No I/O.
    pub(crate) fn from_config(config: DatabaseConfig) -> Self {
        match config.backend {
            BackendType::MySql => Self::MySql(MySqlConnection::new(config)),
            BackendType::Postgres => Self::Postgres(PostgresConnection::new(config)),
            BackendType::Sqlite => Self::Sqlite(SqliteConnection::new(config)),
        }
    }

    /// Logical database name this connection serves.
    pub fn name(&self) -> &str {
        match self {
            Self::MySql(c) => c.name(),
            Self::Postgres(c) => c.name(),
            Self::Sqlite(c) => c.name(),
        }
    }

    pub fn backend_type(&self) -> BackendType {
        match self {
            Self::MySql(_) => BackendType::MySql,
            Self::Postgres(_) => BackendType::Postgres,
            Self::Sqlite(_) => BackendType::Sqlite,
        }
    }

    /// Establish the native pool and probe it. Idempotent: a connected
    /// instance returns immediately.
    pub(crate) async fn connect(&self) -> DbResult<()> {
        match self {
            Self::MySql(c) => c.connect().await,
            Self::Postgres(c) => c.connect().await,
            Self::Sqlite(c) => c.connect().await,
        }
    }

    /// Close the pool and clear the handle. Safe to call when already
    /// disconnected.
    pub(crate) async fn disconnect(&self) {
        match self {
            Self::MySql(c) => c.disconnect().await,
            Self::Postgres(c) => c.disconnect().await,
            Self::Sqlite(c) => c.disconnect().await,
        }
    }

    pub async fn is_connected(&self) -> bool {
        match self {
            Self::MySql(c) => c.is_connected().await,
            Self::Postgres(c) => c.is_connected().await,
            Self::Sqlite(c) => c.is_connected().await,
        }
    }

    /// Run a named-parameter SQL template, connecting first if necessary.
    ///
    /// A failed statement surfaces as `QueryFailed` and leaves the pool up.
    pub async fn query(&self, sql: &str, params: &NamedParams) -> DbResult<QueryResult> {
        match self {
            Self::MySql(c) => c.query(sql, params).await,
            Self::Postgres(c) => c.query(sql, params).await,
            Self::Sqlite(c) => c.query(sql, params).await,
        }
    }

    /// Invoke a stored routine with the calling convention of the backend.
    pub async fn execute(&self, routine: &str, args: &[ParamValue]) -> DbResult<QueryResult> {
        match self {
            Self::MySql(c) => c.execute(routine, args).await,
            Self::Postgres(c) => c.execute(routine, args).await,
            Self::Sqlite(c) => c.execute(routine, args).await,
        }
    }

    /// Check out a dedicated session and start a transaction on it.
    pub async fn begin(&self) -> DbResult<Transaction> {
        match self {
            Self::MySql(c) => c.begin().await,
            Self::Postgres(c) => c.begin().await,
            Self::Sqlite(c) => c.begin().await,
        }
    }

    /// Health probe: connects if needed, runs a trivial round trip, and
    /// swallows every failure into `false`.
    pub async fn test_connection(&self) -> bool {
        match self {
            Self::MySql(c) => c.test_connection().await,
            Self::Postgres(c) => c.test_connection().await,
            Self::Sqlite(c) => c.test_connection().await,
        }
    }

    pub async fn stats(&self) -> ConnectionStats {
        match self {
            Self::MySql(c) => c.stats().await,
            Self::Postgres(c) => c.stats().await,
            Self::Sqlite(c) => c.stats().await,
        }
    }
}

/// Whether a statement is expected to produce a rowset.
///
/// Decides fetch-vs-execute dispatch: row-returning statements are fetched
/// and adapted; everything else runs for its affected-row count.
pub(crate) fn returns_rows(sql: &str) -> bool {
    let keyword = sql
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    match keyword.as_str() {
        "select" | "with" | "show" | "explain" | "describe" | "desc" | "pragma" | "values"
        | "call" | "table" => true,
        _ => contains_returning(sql),
    }
}

/// Word-boundary scan for a RETURNING clause outside of quoted text.
fn contains_returning(sql: &str) -> bool {
    let lower = sql.to_ascii_lowercase();
    let mut rest = lower.as_str();
    let mut offset = 0;
    while let Some(pos) = rest.find("returning") {
        let abs = offset + pos;
        let before_ok = abs == 0
            || !lower.as_bytes()[abs - 1].is_ascii_alphanumeric()
                && lower.as_bytes()[abs - 1] != b'_';
        let after = abs + "returning".len();
        let after_ok = after >= lower.len()
            || !lower.as_bytes()[after].is_ascii_alphanumeric() && lower.as_bytes()[after] != b'_';
        if before_ok && after_ok && !in_single_quotes(&lower[..abs]) {
            return true;
        }
        offset = abs + 1;
        rest = &lower[offset..];
    }
    false
}

fn in_single_quotes(prefix: &str) -> bool {
    prefix.matches('\'').count() % 2 == 1
}

/// Routine names are interpolated into the call statement and must be bare
/// (optionally schema-qualified) identifiers.
pub(crate) fn validate_routine_name(routine: &str) -> bool {
    !routine.is_empty()
        && routine.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
