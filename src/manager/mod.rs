//! The process-wide registry mapping logical database names to live
//! backend connections, plus the aggregate health surface built on it.

pub mod health;
pub mod registry;

pub use health::{DatabaseHealth, HealthReport};
pub use registry::DatabaseManager;
