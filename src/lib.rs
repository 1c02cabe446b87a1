//! Multi-backend SQL connection manager.
//!
//! Presents MySQL, PostgreSQL and SQLite behind one capability surface:
//! register a [`DatabaseConfig`] under a logical name, `get` the name to
//! lazily establish a pooled connection, then run named-parameter queries,
//! invoke routines, and scope transactions - with results and errors
//! normalized across the three engines.
//!
//! ```no_run
//! use multidb::{BackendType, DatabaseConfig, DatabaseManager, NamedParams};
//!
//! # async fn demo() -> Result<(), multidb::DatabaseError> {
//! let manager = DatabaseManager::new();
//! let config = DatabaseConfig::new("primary", BackendType::Sqlite, "data/app.db").unwrap();
//! manager.register(config).await;
//!
//! let db = manager.get("primary").await?;
//! let mut params = NamedParams::new();
//! params.insert("id".into(), 42.into());
//! let result = db.query("SELECT * FROM clients WHERE id = :id", &params).await?;
//! println!("{} rows", result.row_count);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod manager;
pub mod sql;

pub use backend::{BackendConnection, ConnectionStats, Transaction};
pub use config::{BackendType, ConfigError, DatabaseConfig, PoolConfig};
pub use error::{DatabaseError, DbResult};
pub use manager::{DatabaseHealth, DatabaseManager, HealthReport};
pub use sql::{FieldInfo, NamedParams, ParamValue, QueryResult, Row};
