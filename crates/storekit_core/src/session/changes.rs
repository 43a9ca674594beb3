//! Pending change set of one session.

use super::ObjectId;
use serde_json::Value;
use std::collections::HashMap;

/// A record payload waiting to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingRecord {
    pub object_id: ObjectId,
    pub entity: &'static str,
    pub payload: Value,
}

/// What a session knows about one object id before asking the store.
#[derive(Debug, PartialEq)]
pub(crate) enum PendingState<'a> {
    Deleted,
    Changed(&'a Value),
    Untouched,
}

/// Inserted, updated and deleted records not yet written to the store.
///
/// # Invariants
/// - An object id appears in at most one of the three sets.
/// - `insert_order` lists exactly the keys of `inserted`, in allocation order.
/// - Lookups only see a pending record under the entity it was staged for.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    inserted: HashMap<ObjectId, PendingRecord>,
    insert_order: Vec<ObjectId>,
    updated: HashMap<ObjectId, PendingRecord>,
    deleted: HashMap<ObjectId, &'static str>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    pub fn insert(&mut self, record: PendingRecord) {
        self.insert_order.push(record.object_id);
        self.inserted.insert(record.object_id, record);
    }

    /// Records a new payload.
    ///
    /// Returns `false` when the object is pending deletion or is a pending
    /// insert of another entity.
    pub fn update(&mut self, record: PendingRecord) -> bool {
        if self.deleted.contains_key(&record.object_id) {
            return false;
        }
        if let Some(pending) = self.inserted.get_mut(&record.object_id) {
            if pending.entity != record.entity {
                return false;
            }
            pending.payload = record.payload;
            return true;
        }
        self.updated.insert(record.object_id, record);
        true
    }

    /// Marks an object deleted. Deleting a pending insert just drops it.
    pub fn delete(&mut self, entity: &'static str, object_id: ObjectId) {
        match self.inserted.get(&object_id) {
            Some(pending) if pending.entity == entity => {
                self.inserted.remove(&object_id);
                self.insert_order.retain(|id| *id != object_id);
            }
            Some(_) => {}
            None => {
                self.updated.remove(&object_id);
                self.deleted.insert(object_id, entity);
            }
        }
    }

    pub fn clear(&mut self) {
        self.inserted.clear();
        self.insert_order.clear();
        self.updated.clear();
        self.deleted.clear();
    }

    /// Returns whether any pending change concerns `entity`.
    pub fn touches(&self, entity: &str) -> bool {
        self.inserted.values().any(|record| record.entity == entity)
            || self.has_updates_for(entity)
            || self.deleted.values().any(|deleted| *deleted == entity)
    }

    pub fn has_updates_for(&self, entity: &str) -> bool {
        self.updated.values().any(|record| record.entity == entity)
    }

    /// Pending state of `object_id` as a record of `entity`.
    ///
    /// Changes staged for another entity report `Untouched`.
    pub fn state(&self, entity: &str, object_id: &ObjectId) -> PendingState<'_> {
        if let Some(deleted) = self.deleted.get(object_id) {
            return if *deleted == entity {
                PendingState::Deleted
            } else {
                PendingState::Untouched
            };
        }
        self.updated
            .get(object_id)
            .or_else(|| self.inserted.get(object_id))
            .filter(|record| record.entity == entity)
            .map_or(PendingState::Untouched, |record| {
                PendingState::Changed(&record.payload)
            })
    }

    pub fn inserted_for<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a PendingRecord> {
        self.inserted()
            .filter(move |record| record.entity == entity)
    }

    /// Pending inserts in allocation order.
    pub fn inserted(&self) -> impl Iterator<Item = &PendingRecord> {
        self.insert_order
            .iter()
            .filter_map(|object_id| self.inserted.get(object_id))
    }

    pub fn updated(&self) -> impl Iterator<Item = &PendingRecord> {
        self.updated.values()
    }

    /// Pending deletions as `(object_id, entity)`.
    pub fn deleted(&self) -> impl Iterator<Item = (&ObjectId, &'static str)> {
        self.deleted.iter().map(|(object_id, entity)| (object_id, *entity))
    }

    /// Counts as `(inserted, updated, deleted)`.
    pub fn summary(&self) -> (usize, usize, usize) {
        (self.inserted.len(), self.updated.len(), self.deleted.len())
    }
}
