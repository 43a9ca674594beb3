//! Engine handle shared by every session of one manager.
//!
//! # Responsibility
//! - Attach exactly one SQLite store and reconcile it with the model.
//! - Serialize all reads and commits through a single connection.
//!
//! # Invariants
//! - Commits are all-or-nothing; a failed commit leaves the store untouched.
//! - Entity versions recorded in the store never move backwards.

use super::config::StoreConfig;
use super::descriptor::{StoreKind, StoreOptions};
use super::InitError;
use crate::db::{open_db, open_db_in_memory};
use crate::model::Model;
use crate::query::{Filter, QueryError, QueryResult};
use crate::session::{ChangeSet, ObjectId, PersistError};
use log::{info, warn};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

const MODEL_NAME_KEY: &str = "model_name";

/// One persisted row of the `records` table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredRecord {
    pub object_id: ObjectId,
    pub payload: Value,
}

pub(crate) struct Coordinator {
    conn: Mutex<Connection>,
    model: Model,
    location: Option<PathBuf>,
}

impl Coordinator {
    /// Opens the store described by `config` and reconciles it with `model`.
    pub fn attach(model: Model, config: &StoreConfig) -> Result<Self, InitError> {
        let location = config.store_path()?;
        let descriptor = config.descriptor;

        let mut conn = match &location {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|source| {
                        InitError::CreateDataDir {
                            path: parent.to_path_buf(),
                            source,
                        }
                    })?;
                }
                open_db(path)?
            }
            None => open_db_in_memory()?,
        };

        // Ephemeral stores always start empty.
        let options = match descriptor.kind() {
            StoreKind::Durable => descriptor.options(),
            StoreKind::Ephemeral => StoreOptions::default(),
        };
        reconcile_model(&mut conn, &model, &config.model_name, options)?;

        Ok(Self {
            conn: Mutex::new(conn),
            model,
            location,
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads persisted records of `entity` in insertion order.
    pub fn fetch_records(
        &self,
        entity: &str,
        predicate: Option<&Filter>,
    ) -> QueryResult<Vec<StoredRecord>> {
        let (sql, binds) = select_sql("object_id, payload", entity, predicate);
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!("{sql} ORDER BY seq ASC;"))?;
        let mut rows = stmt.query(params_from_iter(binds))?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(entity, row)?);
        }
        Ok(records)
    }

    pub fn fetch_record(
        &self,
        entity: &str,
        object_id: ObjectId,
    ) -> QueryResult<Option<StoredRecord>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT object_id, payload
             FROM records
             WHERE entity = ?1 AND object_id = ?2;",
        )?;
        let mut rows = stmt.query(params![entity, object_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_record_row(entity, row)?)),
            None => Ok(None),
        }
    }

    pub fn count_records(&self, entity: &str, predicate: Option<&Filter>) -> QueryResult<usize> {
        let (sql, binds) = select_sql("COUNT(*)", entity, predicate);
        let conn = self.connection();
        let count = conn.query_row(&format!("{sql};"), params_from_iter(binds), |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Writes a change set in one transaction.
    ///
    /// # Errors
    /// - `PersistError::MissingRecord` when an updated record no longer exists.
    /// - `PersistError::Db` for any SQLite failure.
    pub fn commit(&self, changes: &ChangeSet) -> Result<(), PersistError> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;

        for (object_id, entity) in changes.deleted() {
            tx.execute(
                "DELETE FROM records WHERE object_id = ?1 AND entity = ?2;",
                params![object_id.to_string(), entity],
            )?;
        }

        for record in changes.updated() {
            let changed = tx.execute(
                "UPDATE records
                 SET payload = ?1,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE object_id = ?2 AND entity = ?3;",
                params![
                    record.payload.to_string(),
                    record.object_id.to_string(),
                    record.entity
                ],
            )?;
            if changed == 0 {
                return Err(PersistError::MissingRecord {
                    entity: record.entity.to_string(),
                    object_id: record.object_id,
                });
            }
        }

        for record in changes.inserted() {
            tx.execute(
                "INSERT INTO records (object_id, entity, payload) VALUES (?1, ?2, ?3);",
                params![
                    record.object_id.to_string(),
                    record.entity,
                    record.payload.to_string()
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

fn select_sql(columns: &str, entity: &str, predicate: Option<&Filter>) -> (String, Vec<SqlValue>) {
    let mut binds = vec![SqlValue::Text(entity.to_string())];
    let mut sql = format!("SELECT {columns} FROM records WHERE entity = ?");
    if let Some(filter) = predicate {
        sql.push_str(" AND ");
        sql.push_str(&filter.to_sql("payload", &mut binds));
    }
    (sql, binds)
}

fn parse_record_row(entity: &str, row: &Row<'_>) -> QueryResult<StoredRecord> {
    let id_text: String = row.get("object_id")?;
    let object_id = Uuid::parse_str(&id_text).map_err(|_| QueryError::Decode {
        entity: entity.to_string(),
        message: format!("invalid object id `{id_text}`"),
    })?;

    let payload_text: String = row.get("payload")?;
    let payload = serde_json::from_str(&payload_text).map_err(|err| QueryError::Decode {
        entity: entity.to_string(),
        message: err.to_string(),
    })?;

    Ok(StoredRecord { object_id, payload })
}

/// Records the model in the store, migrating entity versions when allowed.
fn reconcile_model(
    conn: &mut Connection,
    model: &Model,
    model_name: &str,
    options: StoreOptions,
) -> Result<(), InitError> {
    let tx = conn.transaction()?;

    let stored_name: Option<String> = tx
        .query_row(
            "SELECT value FROM store_metadata WHERE key = ?1;",
            [MODEL_NAME_KEY],
            |row| row.get(0),
        )
        .optional()?;
    match stored_name {
        Some(name) if name != model_name => {
            return Err(InitError::IncompatibleStore(format!(
                "store was created for model `{name}`, not `{model_name}`"
            )));
        }
        Some(_) => {}
        None => {
            tx.execute(
                "INSERT INTO store_metadata (key, value) VALUES (?1, ?2);",
                params![MODEL_NAME_KEY, model_name],
            )?;
        }
    }

    let stored_versions = {
        let mut stmt = tx.prepare("SELECT entity, version FROM entity_versions;")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?;
        let versions = rows.collect::<Result<HashMap<_, _>, _>>()?;
        versions
    };
    let fresh = stored_versions.is_empty();

    for description in model.entities() {
        let stored = stored_versions.get(&description.name).copied();
        match stored {
            Some(version) if version == description.version => continue,
            Some(version) if version > description.version => {
                return Err(InitError::IncompatibleStore(format!(
                    "entity `{}` is stored at version {version}, newer than model version {}",
                    description.name, description.version
                )));
            }
            Some(version) if !(options.auto_migrate && options.infer_mapping) => {
                return Err(InitError::IncompatibleStore(format!(
                    "entity `{}` changed from version {version} to {} and mapping inference is disabled",
                    description.name, description.version
                )));
            }
            None if !fresh && !options.auto_migrate => {
                return Err(InitError::IncompatibleStore(format!(
                    "entity `{}` is not in the store and automatic migration is disabled",
                    description.name
                )));
            }
            _ => {}
        }

        tx.execute(
            "INSERT INTO entity_versions (entity, version) VALUES (?1, ?2)
             ON CONFLICT(entity) DO UPDATE SET version = excluded.version;",
            params![description.name, description.version],
        )?;
        if !fresh {
            info!(
                "event=entity_migrate module=store status=ok entity={} from_version={} to_version={}",
                description.name,
                stored.map_or_else(|| "none".to_string(), |version| version.to_string()),
                description.version
            );
        }
    }

    let orphaned = stored_versions
        .keys()
        .filter(|name| model.entity(name).is_none())
        .count();
    if orphaned > 0 {
        warn!("event=entity_migrate module=store status=skipped orphaned_entities={orphaned}");
    }

    tx.commit()?;
    Ok(())
}
