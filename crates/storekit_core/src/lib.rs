//! Typed record store over SQLite.
//!
//! A [`PersistenceManager`] attaches one store and hands out [`Session`]s per
//! concurrency domain; a [`Repository`] binds one [`Entity`] type to a
//! session for typed fetch/insert/count/delete, and sessions persist their
//! pending changes on `save`.

pub mod db;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod session;
pub mod store;

pub use logging::{default_log_level, init_logging, logging_status, LogLevel, LoggingError};
pub use model::{Entity, EntityDescription, Model, ModelError, ModelSource};
pub use query::{all_query, CompareOp, EntityType, Filter, QueryError, QueryResult, QuerySpec, SortKey};
pub use repo::{InsertPolicy, Record, RegistrationError, Repository};
pub use session::{ConcurrencyDomain, ObjectId, PersistError, RawRecord, SaveOutcome, Session};
pub use store::{
    InitError, PersistenceManager, StoreConfig, StoreDescriptor, StoreKind, StoreOptions,
};

/// Minimal health-check API for smoke probes.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
