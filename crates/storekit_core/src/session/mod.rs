//! Sessions: unit-of-work boundaries over a shared store.
//!
//! # Responsibility
//! - Track inserted, updated and deleted records until they are saved.
//! - Answer queries with pending changes merged over persisted records.
//! - Persist the whole pending set in one transaction.
//!
//! # Invariants
//! - Pending changes are visible to every repository bound to the session.
//! - A failed save keeps every change pending.
//! - Saving is session-wide, never per repository.
//!
//! A session belongs to one concurrency domain and is expected to be driven
//! from that domain's execution context only. Nothing here checks it.

use crate::db::DbError;
use crate::model::{Entity, Model};
use crate::query::{QueryResult, QuerySpec};
use crate::repo::{RegistrationError, Repository};
use crate::store::coordinator::Coordinator;
use log::{debug, error, warn};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use uuid::Uuid;

mod changes;

pub(crate) use changes::{ChangeSet, PendingRecord, PendingState};

/// Identity of one record, assigned when it is allocated.
pub type ObjectId = Uuid;

/// Execution context a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConcurrencyDomain {
    /// Foreground work, e.g. a UI thread.
    Interactive,
    /// Worker or batch context.
    Background,
}

impl ConcurrencyDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Background => "background",
        }
    }
}

/// Errors raised while persisting a session's pending changes.
#[derive(Debug)]
pub enum PersistError {
    Db(DbError),
    /// A record value could not be serialized.
    Encode(serde_json::Error),
    /// An updated record was removed from the store by someone else.
    MissingRecord { entity: String, object_id: ObjectId },
}

impl Display for PersistError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Encode(err) => write!(f, "failed to encode record: {err}"),
            Self::MissingRecord { entity, object_id } => {
                write!(f, "`{entity}` record {object_id} no longer exists")
            }
        }
    }
}

impl Error for PersistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Encode(err) => Some(err),
            Self::MissingRecord { .. } => None,
        }
    }
}

impl From<DbError> for PersistError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for PersistError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}

/// Result of one save attempt.
#[derive(Debug)]
pub enum SaveOutcome {
    Saved,
    NothingPending,
    /// Changes stay pending and can be saved again.
    Failed(PersistError),
}

impl SaveOutcome {
    /// Collapses to `true` only when something was written.
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved)
    }

    /// `Ok(true)` when saved, `Ok(false)` when there was nothing to save.
    pub fn into_result(self) -> Result<bool, PersistError> {
        match self {
            Self::Saved => Ok(true),
            Self::NothingPending => Ok(false),
            Self::Failed(err) => Err(err),
        }
    }
}

/// A record as seen by a session: identity plus serialized payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub object_id: ObjectId,
    pub payload: Value,
}

pub struct Session {
    domain: ConcurrencyDomain,
    coordinator: Arc<Coordinator>,
    changes: Mutex<ChangeSet>,
}

impl Session {
    pub(crate) fn new(domain: ConcurrencyDomain, coordinator: Arc<Coordinator>) -> Self {
        Self {
            domain,
            coordinator,
            changes: Mutex::new(ChangeSet::default()),
        }
    }

    pub fn domain(&self) -> ConcurrencyDomain {
        self.domain
    }

    pub fn model(&self) -> &Model {
        self.coordinator.model()
    }

    /// Binds a repository for entity type `T` to this session.
    pub fn repository<T: Entity>(&self) -> Result<Repository<'_, T>, RegistrationError> {
        Repository::try_new(self)
    }

    fn pending(&self) -> MutexGuard<'_, ChangeSet> {
        self.changes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending().is_empty()
    }

    /// Number of pending inserts, updates and deletes.
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Adds a new record to the pending set and returns its identity.
    pub fn allocate_record(&self, entity: &'static str, payload: Value) -> ObjectId {
        let object_id = Uuid::new_v4();
        self.pending().insert(PendingRecord {
            object_id,
            entity,
            payload,
        });
        object_id
    }

    /// Stages a new payload for an existing record.
    ///
    /// Returns `false` (and changes nothing) when the record is already
    /// pending deletion.
    pub fn mark_updated(&self, entity: &'static str, object_id: ObjectId, payload: Value) -> bool {
        let accepted = self.pending().update(PendingRecord {
            object_id,
            entity,
            payload,
        });
        if !accepted {
            warn!(
                "event=session_update module=session status=skipped domain={} entity={entity} reason=pending_delete",
                self.domain.as_str()
            );
        }
        accepted
    }

    /// Stages deletion of a record. Deleting an unsaved insert discards it.
    pub fn mark_deleted(&self, entity: &'static str, object_id: ObjectId) {
        self.pending().delete(entity, object_id);
    }

    /// Discards every pending change.
    pub fn rollback(&self) {
        let mut changes = self.pending();
        let (inserted, updated, deleted) = changes.summary();
        changes.clear();
        debug!(
            "event=session_rollback module=session status=ok domain={} inserted={inserted} updated={updated} deleted={deleted}",
            self.domain.as_str()
        );
    }

    /// Runs `query` over persisted records merged with pending changes.
    ///
    /// Persisted records come first in insertion order, followed by pending
    /// inserts, unless the query specifies an ordering.
    pub fn execute_query<T>(&self, query: &QuerySpec<T>) -> QueryResult<Vec<RawRecord>> {
        query.validate()?;
        let plan = query.plan();
        let changes = self.pending();

        // Pending updates may move a record in or out of the filter, so the
        // predicate is only pushed down to SQL when there are none.
        let push_down = !changes.has_updates_for(plan.entity);
        let persisted = self.coordinator.fetch_records(
            plan.entity,
            if push_down { plan.predicate } else { None },
        )?;

        let mut records = Vec::with_capacity(persisted.len());
        for stored in persisted {
            let payload = match changes.state(plan.entity, &stored.object_id) {
                PendingState::Deleted => continue,
                PendingState::Changed(payload) => payload.clone(),
                PendingState::Untouched => stored.payload,
            };
            if push_down || plan.matches(&payload) {
                records.push(RawRecord {
                    object_id: stored.object_id,
                    payload,
                });
            }
        }
        records.extend(
            changes
                .inserted_for(plan.entity)
                .filter(|pending| plan.matches(&pending.payload))
                .map(|pending| RawRecord {
                    object_id: pending.object_id,
                    payload: pending.payload.clone(),
                }),
        );
        drop(changes);

        plan.sort(&mut records, |record| &record.payload);
        plan.truncate(&mut records);
        Ok(records)
    }

    /// Counts the records `query` would return.
    pub fn execute_count<T>(&self, query: &QuerySpec<T>) -> QueryResult<usize> {
        query.validate()?;
        let plan = query.plan();

        if !self.pending().touches(plan.entity) {
            let count = self.coordinator.count_records(plan.entity, plan.predicate)?;
            return Ok(plan.limit.map_or(count, |limit| count.min(limit)));
        }
        Ok(self.execute_query(query)?.len())
    }

    /// Looks up one record by identity, honoring pending changes.
    pub fn execute_lookup(
        &self,
        entity: &'static str,
        object_id: ObjectId,
    ) -> QueryResult<Option<RawRecord>> {
        {
            let changes = self.pending();
            match changes.state(entity, &object_id) {
                PendingState::Deleted => return Ok(None),
                PendingState::Changed(payload) => {
                    return Ok(Some(RawRecord {
                        object_id,
                        payload: payload.clone(),
                    }))
                }
                PendingState::Untouched => {}
            }
        }

        Ok(self
            .coordinator
            .fetch_record(entity, object_id)?
            .map(|stored| RawRecord {
                object_id: stored.object_id,
                payload: stored.payload,
            }))
    }

    /// Persists all pending changes in one attempt.
    ///
    /// On failure every change stays pending. There is no retry.
    pub fn save(&self) -> SaveOutcome {
        let mut changes = self.pending();
        if changes.is_empty() {
            return SaveOutcome::NothingPending;
        }

        let started_at = Instant::now();
        let (inserted, updated, deleted) = changes.summary();
        match self.coordinator.commit(&changes) {
            Ok(()) => {
                changes.clear();
                debug!(
                    "event=session_save module=session status=ok domain={} inserted={inserted} updated={updated} deleted={deleted} duration_ms={}",
                    self.domain.as_str(),
                    started_at.elapsed().as_millis()
                );
                SaveOutcome::Saved
            }
            Err(err) => {
                error!(
                    "event=session_save module=session status=error domain={} inserted={inserted} updated={updated} deleted={deleted} duration_ms={} error={err}",
                    self.domain.as_str(),
                    started_at.elapsed().as_millis()
                );
                SaveOutcome::Failed(err)
            }
        }
    }

    /// Saves and reports only whether anything was written.
    pub fn attempt_to_save(&self) -> bool {
        self.save().is_saved()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("domain", &self.domain)
            .field("pending_changes", &self.pending_count())
            .finish_non_exhaustive()
    }
}
