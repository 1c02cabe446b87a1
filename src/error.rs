//! Error types for the connection manager.
//!
//! Every fallible operation in this crate resolves to a [`DatabaseError`].
//! The variant is the contract: callers branch on the kind, never on the
//! attached driver error, which is carried for diagnostics only.

use crate::config::BackendType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    /// No configuration registered under this logical name.
    #[error("database '{database}' is not configured")]
    NotConfigured { database: String },

    /// A configuration exists but is switched off.
    #[error("database '{database}' is disabled")]
    Disabled { database: String },

    /// Pool setup, network or authentication failure while establishing
    /// the connection. Retryable.
    #[error("connection to '{database}' ({backend}) failed: {message}")]
    ConnectionFailed {
        database: String,
        backend: BackendType,
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// The statement was rejected or the round-trip failed. The pool for
    /// this database stays up.
    #[error("query on '{database}' ({backend}) failed: {message}")]
    QueryFailed {
        database: String,
        backend: BackendType,
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// Begin, commit or rollback failed. The dedicated session is released
    /// back to the pool regardless.
    #[error("transaction on '{database}' ({backend}) failed: {message}")]
    TransactionFailed {
        database: String,
        backend: BackendType,
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },
}

impl DatabaseError {
    pub fn not_configured(database: impl Into<String>) -> Self {
        Self::NotConfigured {
            database: database.into(),
        }
    }

    pub fn disabled(database: impl Into<String>) -> Self {
        Self::Disabled {
            database: database.into(),
        }
    }

    /// Wrap a driver error that occurred while connecting.
    pub fn connection(database: impl Into<String>, backend: BackendType, err: sqlx::Error) -> Self {
        Self::ConnectionFailed {
            database: database.into(),
            backend,
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Connection failure with no underlying driver error (e.g. a timeout
    /// elapsed before the driver reported anything).
    pub fn connection_msg(
        database: impl Into<String>,
        backend: BackendType,
        message: impl Into<String>,
    ) -> Self {
        Self::ConnectionFailed {
            database: database.into(),
            backend,
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a driver error raised by a query or execute call.
    pub fn query(database: impl Into<String>, backend: BackendType, err: sqlx::Error) -> Self {
        Self::QueryFailed {
            database: database.into(),
            backend,
            message: err.to_string(),
            source: Some(err),
        }
    }

    pub fn query_msg(
        database: impl Into<String>,
        backend: BackendType,
        message: impl Into<String>,
    ) -> Self {
        Self::QueryFailed {
            database: database.into(),
            backend,
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a driver error from the transaction lifecycle.
    pub fn transaction(database: impl Into<String>, backend: BackendType, err: sqlx::Error) -> Self {
        Self::TransactionFailed {
            database: database.into(),
            backend,
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// The logical database name this error is about.
    pub fn database(&self) -> &str {
        match self {
            Self::NotConfigured { database }
            | Self::Disabled { database }
            | Self::ConnectionFailed { database, .. }
            | Self::QueryFailed { database, .. }
            | Self::TransactionFailed { database, .. } => database,
        }
    }

    /// Backend type, for errors raised past configuration lookup.
    pub fn backend(&self) -> Option<BackendType> {
        match self {
            Self::ConnectionFailed { backend, .. }
            | Self::QueryFailed { backend, .. }
            | Self::TransactionFailed { backend, .. } => Some(*backend),
            _ => None,
        }
    }

    /// Whether a caller may reasonably retry the operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }
}

/// Result type alias for manager operations.
pub type DbResult<T> = Result<T, DatabaseError>;
