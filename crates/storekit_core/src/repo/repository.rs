//! Typed repository over one session.
//!
//! # Responsibility
//! - Bind one entity type to one session.
//! - Offer fetch/count/insert/delete with a typed default query.
//!
//! # Invariants
//! - A repository only exists for entity types registered in the model.
//! - Every fetch without an explicit query uses the repository's default
//!   query, which starts out as [`all_query`].
//! - `save` is session-wide: it persists changes made through any
//!   repository sharing the session.

use super::RegistrationError;
use crate::model::Entity;
use crate::query::{all_query, EntityType, QueryError, QueryResult, QuerySpec};
use crate::session::{ObjectId, PersistError, RawRecord, SaveOutcome, Session};
use log::{debug, warn};
use std::ops::{Deref, DerefMut};

/// Whether `insert` saves the session right away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InsertPolicy {
    /// Leave the new record pending until the caller saves.
    #[default]
    Deferred,
    /// Attempt a session save after every insert.
    SaveImmediately,
}

/// A typed record together with its identity in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<T> {
    id: ObjectId,
    value: T,
}

impl<T> Record<T> {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Record<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> DerefMut for Record<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

/// Typed facade binding entity type `T` to a session.
///
/// Cheap to construct; many repositories may share one session.
pub struct Repository<'s, T: Entity> {
    session: &'s Session,
    default_query: QuerySpec<T>,
    insert_policy: InsertPolicy,
}

impl<'s, T: Entity> Repository<'s, T> {
    /// Binds `T` to `session` after checking the model registers it.
    pub fn try_new(session: &'s Session) -> Result<Self, RegistrationError> {
        match session.model().entity(T::ENTITY_NAME) {
            None => Err(RegistrationError::NotRegistered {
                entity: T::ENTITY_NAME,
            }),
            Some(description) if description.version != T::VERSION => {
                Err(RegistrationError::VersionMismatch {
                    entity: T::ENTITY_NAME,
                    registered: description.version,
                    requested: T::VERSION,
                })
            }
            Some(_) => Ok(Self {
                session,
                default_query: all_query::<T>(),
                insert_policy: InsertPolicy::default(),
            }),
        }
    }

    pub fn with_insert_policy(mut self, policy: InsertPolicy) -> Self {
        self.insert_policy = policy;
        self
    }

    /// Replaces the query used by `fetch_all`, `fetch_first`, `count_all`
    /// and `delete_all`.
    pub fn with_default_query(mut self, query: QuerySpec<T>) -> Self {
        self.default_query = query;
        self
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    pub fn default_query(&self) -> &QuerySpec<T> {
        &self.default_query
    }

    pub fn insert_policy(&self) -> InsertPolicy {
        self.insert_policy
    }

    /// Runs the query produced by `build`.
    ///
    /// `Ok(vec![])` means no record matched; errors are returned as-is.
    pub fn try_fetch(
        &self,
        build: impl FnOnce(EntityType<T>) -> QuerySpec<T>,
    ) -> QueryResult<Vec<Record<T>>> {
        self.try_fetch_query(&build(EntityType::new()))
    }

    pub fn try_fetch_query(&self, query: &QuerySpec<T>) -> QueryResult<Vec<Record<T>>> {
        self.session
            .execute_query(query)?
            .into_iter()
            .map(decode::<T>)
            .collect()
    }

    pub fn try_fetch_all(&self) -> QueryResult<Vec<Record<T>>> {
        self.try_fetch_query(&self.default_query)
    }

    pub fn try_fetch_first(&self) -> QueryResult<Option<Record<T>>> {
        Ok(self.try_fetch_all()?.into_iter().next())
    }

    /// Like [`Self::try_fetch`], but logs failures and returns `None`.
    ///
    /// `None` means the query failed; `Some(vec![])` means nothing matched.
    pub fn fetch(
        &self,
        build: impl FnOnce(EntityType<T>) -> QuerySpec<T>,
    ) -> Option<Vec<Record<T>>> {
        self.log_query_failure("fetch", self.try_fetch(build)).ok()
    }

    pub fn fetch_all(&self) -> Option<Vec<Record<T>>> {
        self.log_query_failure("fetch", self.try_fetch_all()).ok()
    }

    /// First record of the default query; `None` when empty or on failure.
    pub fn fetch_first(&self) -> Option<Record<T>> {
        self.fetch_all()?.into_iter().next()
    }

    /// Loads one record by identity, including unsaved changes.
    pub fn fetch_by_id(&self, id: ObjectId) -> QueryResult<Option<Record<T>>> {
        self.session
            .execute_lookup(T::ENTITY_NAME, id)?
            .map(decode::<T>)
            .transpose()
    }

    pub fn try_count(&self, query: &QuerySpec<T>) -> QueryResult<usize> {
        self.session.execute_count(query)
    }

    /// Counts matches of `query`; logs failures and returns `0`.
    ///
    /// Counting never decodes payloads. It agrees with the length of
    /// [`Self::fetch_all`] except when stored payloads cannot be decoded as
    /// `T`: the fetch then fails while the count still reports the rows.
    pub fn count(&self, query: &QuerySpec<T>) -> usize {
        self.log_query_failure("count", self.try_count(query))
            .unwrap_or_default()
    }

    /// Counts matches of the query produced by `build`; `0` on failure.
    pub fn count_with(&self, build: impl FnOnce(EntityType<T>) -> QuerySpec<T>) -> usize {
        self.count(&build(EntityType::new()))
    }

    /// Counts matches of the default query; `0` on failure.
    pub fn count_all(&self) -> usize {
        self.count(&self.default_query)
    }

    /// Allocates a new record with default field values.
    pub fn insert(&self) -> Result<Record<T>, PersistError> {
        self.insert_with(|record| record)
    }

    /// Allocates a new record and lets `configure` shape it.
    ///
    /// The value returned by `configure` is the one staged in the session
    /// and returned here. Under [`InsertPolicy::SaveImmediately`] the session
    /// is saved afterwards; a failed save is logged and the record stays
    /// pending.
    pub fn insert_with(&self, configure: impl FnOnce(T) -> T) -> Result<Record<T>, PersistError> {
        let value = configure(T::default());
        let payload = serde_json::to_value(&value)?;
        let id = self.session.allocate_record(T::ENTITY_NAME, payload);

        if self.insert_policy == InsertPolicy::SaveImmediately {
            if let SaveOutcome::Failed(err) = self.session.save() {
                warn!(
                    "event=repo_insert module=repo status=save_failed entity={} error={err}",
                    T::ENTITY_NAME
                );
            }
        }

        Ok(Record { id, value })
    }

    /// Stages the current value of `record` as an update.
    ///
    /// Returns `Ok(false)` when the record is already pending deletion.
    pub fn update(&self, record: &Record<T>) -> Result<bool, PersistError> {
        let payload = serde_json::to_value(&record.value)?;
        Ok(self
            .session
            .mark_updated(T::ENTITY_NAME, record.id, payload))
    }

    /// Stages deletion of one record.
    pub fn delete(&self, record: &Record<T>) {
        self.session.mark_deleted(T::ENTITY_NAME, record.id);
    }

    /// Stages deletion of every record matched by the default query and
    /// returns how many were marked. Nothing is persisted until `save`.
    pub fn try_delete_all(&self) -> QueryResult<usize> {
        let records = self.session.execute_query(&self.default_query)?;
        for record in &records {
            self.session.mark_deleted(T::ENTITY_NAME, record.object_id);
        }
        debug!(
            "event=repo_delete_all module=repo status=ok entity={} marked={}",
            T::ENTITY_NAME,
            records.len()
        );
        Ok(records.len())
    }

    /// Like [`Self::try_delete_all`], logging failures instead of returning them.
    pub fn delete_all(&self) {
        self.log_query_failure("delete_all", self.try_delete_all())
            .ok();
    }

    /// Saves the session's pending changes.
    pub fn save_outcome(&self) -> SaveOutcome {
        self.session.save()
    }

    /// `true` only when changes were written; `false` when there was
    /// nothing to save or the save failed (the failure is logged).
    pub fn save(&self) -> bool {
        self.save_outcome().is_saved()
    }

    fn log_query_failure<R>(&self, operation: &str, result: QueryResult<R>) -> QueryResult<R> {
        if let Err(err) = &result {
            warn!(
                "event=repo_{operation} module=repo status=error entity={} domain={} error={err}",
                T::ENTITY_NAME,
                self.session.domain().as_str()
            );
        }
        result
    }
}

impl<T: Entity> Clone for Repository<'_, T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session,
            default_query: self.default_query.clone(),
            insert_policy: self.insert_policy,
        }
    }
}

impl<T: Entity> std::fmt::Debug for Repository<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &T::ENTITY_NAME)
            .field("domain", &self.session.domain())
            .field("default_query", &self.default_query)
            .field("insert_policy", &self.insert_policy)
            .finish()
    }
}

fn decode<T: Entity>(record: RawRecord) -> QueryResult<Record<T>> {
    let value = serde_json::from_value(record.payload).map_err(|err| QueryError::Decode {
        entity: T::ENTITY_NAME.to_string(),
        message: err.to_string(),
    })?;
    Ok(Record {
        id: record.object_id,
        value,
    })
}
