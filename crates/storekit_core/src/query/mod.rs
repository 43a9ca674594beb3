//! Typed query descriptions.
//!
//! # Responsibility
//! - Describe which records of one entity type to fetch or count.
//! - Provide the single canonical "all records, unfiltered" query.
//!
//! # Invariants
//! - A `QuerySpec<T>` always targets `T::ENTITY_NAME`.
//! - Records without explicit ordering keep insertion order.

use crate::db::DbError;
use crate::model::Entity;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::marker::PhantomData;

mod filter;

pub use filter::{CompareOp, Filter};

pub(crate) use filter::{field_value, is_valid_field_path, scalar, sort_order};

pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while executing a fetch or count.
#[derive(Debug)]
pub enum QueryError {
    Db(DbError),
    /// Predicate or sort key references a malformed field path.
    InvalidField(String),
    /// A stored payload could not be read back as the requested type.
    Decode { entity: String, message: String },
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidField(field) => write!(f, "invalid field path `{field}`"),
            Self::Decode { entity, message } => {
                write!(f, "failed to decode `{entity}` record: {message}")
            }
        }
    }
}

impl Error for QueryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidField(_) | Self::Decode { .. } => None,
        }
    }
}

impl From<DbError> for QueryError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One ordering term of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Type token handed to query builders in place of a record instance.
pub struct EntityType<T>(PhantomData<fn() -> T>);

impl<T: Entity> EntityType<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }

    pub fn name(self) -> &'static str {
        T::ENTITY_NAME
    }

    /// Shorthand for [`all_query`].
    pub fn all_query(self) -> QuerySpec<T> {
        all_query::<T>()
    }
}

impl<T: Entity> Default for EntityType<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EntityType<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EntityType<T> {}

/// Query over records of entity type `T`.
pub struct QuerySpec<T> {
    entity_name: &'static str,
    predicate: Option<Filter>,
    ordering: Option<Vec<SortKey>>,
    limit: Option<usize>,
    _entity: PhantomData<fn() -> T>,
}

/// Returns the query for every record of `T`: no filter, no ordering.
pub fn all_query<T: Entity>() -> QuerySpec<T> {
    QuerySpec {
        entity_name: T::ENTITY_NAME,
        predicate: None,
        ordering: None,
        limit: None,
        _entity: PhantomData,
    }
}

impl<T: Entity> QuerySpec<T> {
    /// Adds a predicate. Repeated calls are combined with `AND`.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Appends a sort key after any existing ones.
    pub fn order_by(mut self, key: SortKey) -> Self {
        self.ordering.get_or_insert_with(Vec::new).push(key);
        self
    }

    /// Caps the number of returned records.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl<T> QuerySpec<T> {
    pub fn entity_name(&self) -> &'static str {
        self.entity_name
    }

    pub fn predicate(&self) -> Option<&Filter> {
        self.predicate.as_ref()
    }

    pub fn ordering(&self) -> Option<&[SortKey]> {
        self.ordering.as_deref()
    }

    pub fn fetch_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Checks every field path used by the predicate and the ordering.
    pub fn validate(&self) -> QueryResult<()> {
        if let Some(field) = self.predicate.as_ref().and_then(Filter::invalid_field) {
            return Err(QueryError::InvalidField(field.to_string()));
        }
        if let Some(key) = self
            .ordering
            .iter()
            .flatten()
            .find(|key| !is_valid_field_path(&key.field))
        {
            return Err(QueryError::InvalidField(key.field.clone()));
        }
        Ok(())
    }

    pub(crate) fn plan(&self) -> QueryPlan<'_> {
        QueryPlan {
            entity: self.entity_name,
            predicate: self.predicate.as_ref(),
            ordering: self.ordering.as_deref().unwrap_or(&[]),
            limit: self.limit,
        }
    }
}

impl<T> Clone for QuerySpec<T> {
    fn clone(&self) -> Self {
        Self {
            entity_name: self.entity_name,
            predicate: self.predicate.clone(),
            ordering: self.ordering.clone(),
            limit: self.limit,
            _entity: PhantomData,
        }
    }
}

impl<T> Debug for QuerySpec<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySpec")
            .field("entity_name", &self.entity_name)
            .field("predicate", &self.predicate)
            .field("ordering", &self.ordering)
            .field("limit", &self.limit)
            .finish()
    }
}

impl<T> PartialEq for QuerySpec<T> {
    fn eq(&self, other: &Self) -> bool {
        self.entity_name == other.entity_name
            && self.predicate == other.predicate
            && self.ordering == other.ordering
            && self.limit == other.limit
    }
}

/// Untyped view of a query, as executed by a session.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueryPlan<'q> {
    pub entity: &'static str,
    pub predicate: Option<&'q Filter>,
    pub ordering: &'q [SortKey],
    pub limit: Option<usize>,
}

impl QueryPlan<'_> {
    pub fn matches(&self, payload: &Value) -> bool {
        self.predicate.map_or(true, |filter| filter.matches(payload))
    }

    /// Stable sort by the plan's keys; ties keep their incoming order.
    pub fn sort<R>(&self, records: &mut [R], payload: impl Fn(&R) -> &Value) {
        if self.ordering.is_empty() {
            return;
        }
        records.sort_by(|left, right| {
            let (left, right) = (payload(left), payload(right));
            self.ordering
                .iter()
                .map(|key| {
                    let ordering = sort_order(
                        &field_value(left, &key.field).map_or(filter::Scalar::Null, scalar),
                        &field_value(right, &key.field).map_or(filter::Scalar::Null, scalar),
                    );
                    match key.direction {
                        SortDirection::Ascending => ordering,
                        SortDirection::Descending => ordering.reverse(),
                    }
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    pub fn truncate<R>(&self, records: &mut Vec<R>) {
        if let Some(limit) = self.limit {
            records.truncate(limit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{all_query, EntityType, Filter, QueryError, SortKey};
    use crate::model::Entity;
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Widget {
        name: String,
    }

    impl Entity for Widget {
        const ENTITY_NAME: &'static str = "Widget";
    }

    #[test]
    fn all_query_is_unfiltered_and_unordered() {
        let query = all_query::<Widget>();
        assert_eq!(query.entity_name(), "Widget");
        assert!(query.predicate().is_none());
        assert!(query.ordering().is_none());
        assert!(query.fetch_limit().is_none());
        assert_eq!(EntityType::<Widget>::new().all_query(), query);
    }

    #[test]
    fn repeated_filters_are_combined() {
        let query = all_query::<Widget>()
            .filter(Filter::eq("name", "a"))
            .filter(Filter::gt("rank", 1));
        assert_eq!(
            query.predicate(),
            Some(&Filter::And(vec![
                Filter::eq("name", "a"),
                Filter::gt("rank", 1)
            ]))
        );
    }

    #[test]
    fn validate_rejects_bad_sort_fields() {
        let query = all_query::<Widget>().order_by(SortKey::asc("name;drop"));
        assert!(matches!(query.validate(), Err(QueryError::InvalidField(field)) if field == "name;drop"));
    }

    #[test]
    fn plan_sorts_by_multiple_keys_and_truncates() {
        let query = all_query::<Widget>()
            .order_by(SortKey::desc("rank"))
            .order_by(SortKey::asc("name"))
            .limit(3);
        let plan = query.plan();

        let mut rows: Vec<Value> = vec![
            json!({"name": "c", "rank": 1}),
            json!({"name": "b", "rank": 2}),
            json!({"name": "a", "rank": 2}),
            json!({"name": "d"}),
        ];
        plan.sort(&mut rows, |row| row);
        plan.truncate(&mut rows);

        let names: Vec<&str> = rows.iter().map(|row| row["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
