//! Record filters over JSON payload fields.
//!
//! A filter is evaluated in two places: compiled to SQL for persisted rows
//! and evaluated in memory for records still pending in a session. Both
//! paths follow SQLite comparison rules so a record matches the same way
//! before and after it is saved:
//! - a missing field or JSON `null` never compares (only `is_null` matches);
//! - booleans compare as integers `1`/`0`;
//! - numbers sort before text, text compares bytewise.

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;

static FIELD_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("field path pattern is valid")
});

/// Comparison operator for [`Filter::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

/// Predicate over the fields of a stored record.
///
/// Field names address the record's serialized form; nested fields use dots
/// (`"owner.name"`).
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    /// Field is a string containing `needle` (case-sensitive).
    Contains { field: String, needle: String },
    /// Field is missing or JSON `null`.
    IsNull(String),
    /// All filters match. Empty matches everything.
    And(Vec<Filter>),
    /// Any filter matches. Empty matches nothing.
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            needle: needle.into(),
        }
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull(field.into())
    }

    /// Combines with `other`, flattening nested conjunctions.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut filters) => {
                filters.push(other);
                Self::And(filters)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Combines with `other`, flattening nested disjunctions.
    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut filters) => {
                filters.push(other);
                Self::Or(filters)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Returns the first field path that is not a valid identifier path.
    pub fn invalid_field(&self) -> Option<&str> {
        match self {
            Self::Compare { field, .. } | Self::Contains { field, .. } | Self::IsNull(field) => {
                (!is_valid_field_path(field)).then_some(field.as_str())
            }
            Self::And(filters) | Self::Or(filters) => {
                filters.iter().find_map(|filter| filter.invalid_field())
            }
            Self::Not(inner) => inner.invalid_field(),
        }
    }

    /// Evaluates the filter against one record payload.
    pub fn matches(&self, payload: &Value) -> bool {
        match self {
            Self::Compare { field, op, value } => {
                let actual = field_value(payload, field);
                match (value, op) {
                    (Value::Null, CompareOp::Eq) => actual.is_none(),
                    (Value::Null, CompareOp::Ne) => actual.is_some(),
                    (Value::Null, _) => false,
                    _ => actual
                        .and_then(|actual| compare_scalars(&scalar(actual), &scalar(value)))
                        .is_some_and(|ordering| op.accepts(ordering)),
                }
            }
            Self::Contains { field, needle } => match field_value(payload, field) {
                Some(Value::String(text)) => text.contains(needle.as_str()),
                _ => false,
            },
            Self::IsNull(field) => field_value(payload, field).is_none(),
            Self::And(filters) => filters.iter().all(|filter| filter.matches(payload)),
            Self::Or(filters) => filters.iter().any(|filter| filter.matches(payload)),
            Self::Not(inner) => !inner.matches(payload),
        }
    }

    /// Compiles the filter to a SQL boolean expression over `payload_column`.
    ///
    /// Every produced expression is two-valued (never SQL `NULL`), so `NOT`
    /// behaves exactly like [`Filter::matches`].
    pub(crate) fn to_sql(&self, payload_column: &str, binds: &mut Vec<SqlValue>) -> String {
        match self {
            Self::Compare { field, op, value } => {
                binds.push(SqlValue::Text(json_path(field)));
                match (value, op) {
                    (Value::Null, CompareOp::Eq) => {
                        format!("json_extract({payload_column}, ?) IS NULL")
                    }
                    (Value::Null, CompareOp::Ne) => {
                        format!("json_extract({payload_column}, ?) IS NOT NULL")
                    }
                    (Value::Null, _) => {
                        binds.pop();
                        "0".to_string()
                    }
                    _ => {
                        binds.push(sql_value(value));
                        format!(
                            "COALESCE(json_extract({payload_column}, ?) {} ?, 0)",
                            op.sql()
                        )
                    }
                }
            }
            Self::Contains { field, needle } => {
                let path = json_path(field);
                binds.push(SqlValue::Text(path.clone()));
                binds.push(SqlValue::Text(path));
                binds.push(SqlValue::Text(needle.clone()));
                format!(
                    "COALESCE(json_type({payload_column}, ?) = 'text' AND instr(json_extract({payload_column}, ?), ?) > 0, 0)"
                )
            }
            Self::IsNull(field) => {
                binds.push(SqlValue::Text(json_path(field)));
                format!("json_extract({payload_column}, ?) IS NULL")
            }
            Self::And(filters) => join_sql(filters, " AND ", "1", payload_column, binds),
            Self::Or(filters) => join_sql(filters, " OR ", "0", payload_column, binds),
            Self::Not(inner) => format!("(NOT {})", inner.to_sql(payload_column, binds)),
        }
    }
}

fn join_sql(
    filters: &[Filter],
    separator: &str,
    empty: &str,
    payload_column: &str,
    binds: &mut Vec<SqlValue>,
) -> String {
    if filters.is_empty() {
        return empty.to_string();
    }
    let parts: Vec<String> = filters
        .iter()
        .map(|filter| filter.to_sql(payload_column, binds))
        .collect();
    format!("({})", parts.join(separator))
}

pub(crate) fn is_valid_field_path(field: &str) -> bool {
    FIELD_PATH_RE.is_match(field)
}

fn json_path(field: &str) -> String {
    format!("$.{field}")
}

/// Resolves a dotted field path; `None` for missing fields and JSON `null`.
pub(crate) fn field_value<'a>(payload: &'a Value, field: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in field.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    (!current.is_null()).then_some(current)
}

/// Scalar view of a JSON value as SQLite's `json_extract` would return it.
#[derive(Debug, PartialEq)]
pub(crate) enum Scalar<'a> {
    Null,
    Integer(i64),
    Real(f64),
    Text(Cow<'a, str>),
}

pub(crate) fn scalar(value: &Value) -> Scalar<'_> {
    match value {
        Value::Null => Scalar::Null,
        Value::Bool(flag) => Scalar::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(int) => Scalar::Integer(int),
            None => Scalar::Real(number.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(text) => Scalar::Text(Cow::Borrowed(text.as_str())),
        other => Scalar::Text(Cow::Owned(other.to_string())),
    }
}

fn sql_value(value: &Value) -> SqlValue {
    match scalar(value) {
        Scalar::Null => SqlValue::Null,
        Scalar::Integer(int) => SqlValue::Integer(int),
        Scalar::Real(real) => SqlValue::Real(real),
        Scalar::Text(text) => SqlValue::Text(text.into_owned()),
    }
}

/// SQLite comparison between two non-null scalars. `None` when either is null.
pub(crate) fn compare_scalars(left: &Scalar<'_>, right: &Scalar<'_>) -> Option<Ordering> {
    match (left, right) {
        (Scalar::Null, _) | (_, Scalar::Null) => None,
        (Scalar::Integer(a), Scalar::Integer(b)) => Some(a.cmp(b)),
        (Scalar::Integer(a), Scalar::Real(b)) => (*a as f64).partial_cmp(b),
        (Scalar::Real(a), Scalar::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Scalar::Real(a), Scalar::Real(b)) => a.partial_cmp(b),
        (Scalar::Text(a), Scalar::Text(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        (Scalar::Text(_), _) => Some(Ordering::Greater),
        (_, Scalar::Text(_)) => Some(Ordering::Less),
    }
}

/// Total order used for sorting: nulls first, then numbers, then text.
pub(crate) fn sort_order(left: &Scalar<'_>, right: &Scalar<'_>) -> Ordering {
    match (left, right) {
        (Scalar::Null, Scalar::Null) => Ordering::Equal,
        (Scalar::Null, _) => Ordering::Less,
        (_, Scalar::Null) => Ordering::Greater,
        _ => compare_scalars(left, right).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::{compare_scalars, field_value, scalar, sort_order, Filter, Scalar};
    use rusqlite::params_from_iter;
    use rusqlite::Connection;
    use serde_json::{json, Value};
    use std::cmp::Ordering;

    fn sql_matches(filter: &Filter, payload: &Value) -> bool {
        let conn = Connection::open_in_memory().unwrap();
        let mut binds = vec![rusqlite::types::Value::Text(payload.to_string())];
        let expr = filter.to_sql("p.payload", &mut binds);
        let sql = format!("WITH p(payload) AS (SELECT ?) SELECT {expr} FROM p;");
        conn.query_row(&sql, params_from_iter(binds), |row| row.get::<_, i64>(0))
            .unwrap()
            == 1
    }

    fn assert_same(filter: &Filter, payload: &Value, expected: bool) {
        assert_eq!(filter.matches(payload), expected, "memory: {filter:?} on {payload}");
        assert_eq!(sql_matches(filter, payload), expected, "sql: {filter:?} on {payload}");
    }

    #[test]
    fn comparisons_agree_between_sql_and_memory() {
        let payload = json!({"name": "beta", "rank": 3, "score": 2.5, "active": true});

        assert_same(&Filter::eq("name", "beta"), &payload, true);
        assert_same(&Filter::ne("name", "beta"), &payload, false);
        assert_same(&Filter::gt("rank", 2), &payload, true);
        assert_same(&Filter::le("rank", 2), &payload, false);
        assert_same(&Filter::lt("score", 3), &payload, true);
        assert_same(&Filter::eq("active", true), &payload, true);
        assert_same(&Filter::eq("active", 1), &payload, true);
        assert_same(&Filter::gt("name", 100), &payload, true);
    }

    #[test]
    fn missing_fields_only_match_null_checks() {
        let payload = json!({"name": "a", "note": null});

        assert_same(&Filter::eq("rank", 1), &payload, false);
        assert_same(&Filter::ne("rank", 1), &payload, false);
        assert_same(&Filter::eq("rank", 1).negate(), &payload, true);
        assert_same(&Filter::is_null("rank"), &payload, true);
        assert_same(&Filter::is_null("note"), &payload, true);
        assert_same(&Filter::eq("note", Value::Null), &payload, true);
        assert_same(&Filter::ne("name", Value::Null), &payload, true);
        assert_same(&Filter::lt("name", Value::Null), &payload, false);
    }

    #[test]
    fn contains_only_matches_strings() {
        let payload = json!({"name": "gadget", "rank": 123});

        assert_same(&Filter::contains("name", "dge"), &payload, true);
        assert_same(&Filter::contains("name", "DGE"), &payload, false);
        assert_same(&Filter::contains("rank", "2"), &payload, false);
    }

    #[test]
    fn combinators_agree_between_sql_and_memory() {
        let payload = json!({"name": "a", "rank": 5, "owner": {"name": "kim"}});

        assert_same(&Filter::And(Vec::new()), &payload, true);
        assert_same(&Filter::Or(Vec::new()), &payload, false);
        assert_same(
            &Filter::eq("name", "a").and(Filter::gt("rank", 4)),
            &payload,
            true,
        );
        assert_same(
            &Filter::eq("name", "b").or(Filter::eq("owner.name", "kim")),
            &payload,
            true,
        );
        assert_same(
            &Filter::eq("name", "a").and(Filter::gt("rank", 9)).negate(),
            &payload,
            true,
        );
    }

    #[test]
    fn field_paths_are_validated() {
        assert!(Filter::eq("owner.name", 1).invalid_field().is_none());
        assert_eq!(
            Filter::eq("ok", 1)
                .and(Filter::eq("bad field", 1))
                .invalid_field(),
            Some("bad field")
        );
        assert_eq!(Filter::is_null("$.x").invalid_field(), Some("$.x"));
    }

    #[test]
    fn field_value_treats_null_as_missing() {
        let payload = json!({"a": {"b": null, "c": 1}});
        assert!(field_value(&payload, "a.b").is_none());
        assert_eq!(field_value(&payload, "a.c"), Some(&json!(1)));
        assert!(field_value(&payload, "a.c.d").is_none());
    }

    #[test]
    fn scalar_ordering_puts_numbers_before_text() {
        assert_eq!(
            compare_scalars(&Scalar::Integer(2), &Scalar::Real(2.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare_scalars(&scalar(&json!(99)), &scalar(&json!("1"))),
            Some(Ordering::Less)
        );
        assert_eq!(compare_scalars(&Scalar::Null, &Scalar::Integer(1)), None);
        assert_eq!(
            sort_order(&Scalar::Null, &Scalar::Integer(1)),
            Ordering::Less
        );
    }
}
