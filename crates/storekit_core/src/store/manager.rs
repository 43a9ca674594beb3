//! Persistence manager: owns the attached store and its sessions.
//!
//! # Responsibility
//! - Merge model sources and attach exactly one store at construction.
//! - Hand out one cached session per concurrency domain.
//!
//! # Invariants
//! - Repeated `session(domain)` calls return the same `Arc<Session>`.
//! - Sessions are never recreated while the manager is alive.
//! - Dropping the manager (and every session handle) closes the store.

use super::config::StoreConfig;
use super::coordinator::Coordinator;
use super::descriptor::StoreDescriptor;
use super::InitError;
use crate::model::{Model, ModelSource};
use crate::session::{ConcurrencyDomain, Session};
use log::{error, info};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

pub struct PersistenceManager {
    config: StoreConfig,
    sources: Vec<ModelSource>,
    coordinator: Arc<Coordinator>,
    sessions: Mutex<HashMap<ConcurrencyDomain, Arc<Session>>>,
}

impl PersistenceManager {
    /// Merges `sources` into one model and attaches the configured store.
    ///
    /// # Errors
    /// Any `InitError` means the store is unusable with this configuration;
    /// callers should treat it as fatal.
    pub fn initialize(sources: Vec<ModelSource>, config: StoreConfig) -> Result<Self, InitError> {
        let started_at = Instant::now();
        let kind = config.descriptor.kind().as_str();
        info!(
            "event=store_init module=store status=start kind={kind} model={} sources={}",
            config.model_name,
            sources.len()
        );

        let attached = Model::merge(&sources)
            .map_err(InitError::from)
            .and_then(|model| Coordinator::attach(model, &config));

        let coordinator = match attached {
            Ok(coordinator) => coordinator,
            Err(err) => {
                error!(
                    "event=store_init module=store status=error kind={kind} model={} duration_ms={} error={err}",
                    config.model_name,
                    started_at.elapsed().as_millis()
                );
                return Err(err);
            }
        };

        let [(migrate_flag, auto_migrate), (infer_flag, infer_mapping)] =
            config.descriptor.options().flags();
        info!(
            "event=store_init module=store status=ok kind={kind} model={} entities={} {migrate_flag}={auto_migrate} {infer_flag}={infer_mapping} duration_ms={}",
            config.model_name,
            coordinator.model().len(),
            started_at.elapsed().as_millis()
        );

        Ok(Self {
            config,
            sources,
            coordinator: Arc::new(coordinator),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the session bound to `domain`, creating it on first use.
    pub fn session(&self, domain: ConcurrencyDomain) -> Arc<Session> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(domain).or_insert_with(|| {
            info!(
                "event=session_create module=store status=ok domain={}",
                domain.as_str()
            );
            Arc::new(Session::new(domain, Arc::clone(&self.coordinator)))
        }))
    }

    /// Session for interactive (foreground) work.
    pub fn interactive(&self) -> Arc<Session> {
        self.session(ConcurrencyDomain::Interactive)
    }

    /// Session for background work.
    pub fn background(&self) -> Arc<Session> {
        self.session(ConcurrencyDomain::Background)
    }

    pub fn model(&self) -> &Model {
        self.coordinator.model()
    }

    pub fn model_sources(&self) -> &[ModelSource] {
        &self.sources
    }

    pub fn model_name(&self) -> &str {
        &self.config.model_name
    }

    pub fn descriptor(&self) -> StoreDescriptor {
        self.config.descriptor
    }

    /// On-disk location of a durable store; `None` for ephemeral stores.
    pub fn store_path(&self) -> Option<&Path> {
        self.coordinator.location()
    }
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("config", &self.config)
            .field("store_path", &self.store_path())
            .finish_non_exhaustive()
    }
}
