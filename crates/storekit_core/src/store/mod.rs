//! Store setup: descriptors, configuration, the engine coordinator and the
//! persistence manager that hands out sessions.
//!
//! # Invariants
//! - A manager is only returned once its store is fully attached.
//! - Setup failures are reported as `InitError`; they are not retried.

use crate::db::DbError;
use crate::model::ModelError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

mod config;
pub(crate) mod coordinator;
mod descriptor;
mod manager;

pub use config::{store_file_path, user_data_dir, StoreConfig, STORE_FILE_EXTENSION};
pub use descriptor::{StoreDescriptor, StoreKind, StoreOptions};
pub use manager::PersistenceManager;

/// Store setup failure. Treat as a configuration or programming error.
#[derive(Debug)]
pub enum InitError {
    Model(ModelError),
    InvalidModelName(String),
    DataDirUnavailable,
    CreateDataDir {
        path: PathBuf,
        source: std::io::Error,
    },
    Db(DbError),
    /// Existing store cannot be opened with this model and options.
    IncompatibleStore(String),
}

impl Display for InitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Model(err) => write!(f, "{err}"),
            Self::InvalidModelName(name) => write!(f, "invalid model name `{name}`"),
            Self::DataDirUnavailable => write!(f, "unable to locate the user data directory"),
            Self::CreateDataDir { path, source } => write!(
                f,
                "failed to create data directory `{}`: {source}",
                path.display()
            ),
            Self::Db(err) => write!(f, "{err}"),
            Self::IncompatibleStore(reason) => write!(f, "incompatible store: {reason}"),
        }
    }
}

impl Error for InitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Model(err) => Some(err),
            Self::CreateDataDir { source, .. } => Some(source),
            Self::Db(err) => Some(err),
            Self::InvalidModelName(_) | Self::DataDirUnavailable | Self::IncompatibleStore(_) => {
                None
            }
        }
    }
}

impl From<ModelError> for InitError {
    fn from(value: ModelError) -> Self {
        Self::Model(value)
    }
}

impl From<DbError> for InitError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for InitError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
