//! Persistence layer: libSQL-backed storage for runs, feedback, and
//! the pattern model.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{BackendUsage, Store, StoreStats, TierAverage};
