//! Typed repository layer.
//!
//! # Responsibility
//! - Expose type-safe record access on top of untyped sessions.
//! - Offer both explicit `Result` APIs and sentinel adapters (`None`, `0`,
//!   `false`) that log and absorb query and save failures.
//!
//! # Invariants
//! - Sentinel adapters never panic and never hide an error without a log line.
//! - Binding an unregistered entity type fails at construction.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod repository;

pub use repository::{InsertPolicy, Record, Repository};

/// Entity type is missing from, or out of date with, the session's model.
///
/// This is a setup error; it is not expected to be handled at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    NotRegistered {
        entity: &'static str,
    },
    VersionMismatch {
        entity: &'static str,
        registered: u32,
        requested: u32,
    },
}

impl Display for RegistrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRegistered { entity } => {
                write!(f, "entity `{entity}` is not registered in the model")
            }
            Self::VersionMismatch {
                entity,
                registered,
                requested,
            } => write!(
                f,
                "entity `{entity}` is registered at version {registered}, requested version {requested}"
            ),
        }
    }
}

impl Error for RegistrationError {}
