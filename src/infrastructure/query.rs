//! Query arguments and SQL rendering
//!
//! The argument types here are shared by every model. Rendering validates field names
//! against the model's [`ModelDescriptor`], quotes identifiers and binds every value, so
//! callers never splice user input into SQL text.

use crate::infrastructure::error::{StoreError, StoreResult};
use crate::infrastructure::schema::{FieldKind, ModelDescriptor, quote};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::BTreeMap;

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::Text(value.clone())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Write-side value of a nullable JSON column.
///
/// `DbNull` leaves the column SQL `NULL`, `JsonNull` stores the JSON literal `null`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NullableJson {
    #[default]
    DbNull,
    JsonNull,
    Value(serde_json::Value),
}

impl NullableJson {
    pub fn from_column(column: Option<Json<serde_json::Value>>) -> Self {
        match column {
            None => NullableJson::DbNull,
            Some(Json(serde_json::Value::Null)) => NullableJson::JsonNull,
            Some(Json(value)) => NullableJson::Value(value),
        }
    }

    pub fn into_column(self) -> Option<Json<serde_json::Value>> {
        match self {
            NullableJson::DbNull => None,
            NullableJson::JsonNull => Some(Json(serde_json::Value::Null)),
            NullableJson::Value(value) => Some(Json(value)),
        }
    }
}

impl From<NullableJson> for Value {
    fn from(value: NullableJson) -> Self {
        match value {
            NullableJson::DbNull => Value::Null,
            NullableJson::JsonNull => Value::Json(serde_json::Value::Null),
            NullableJson::Value(value) => Value::Json(value),
        }
    }
}

/// Read-side null test on a nullable JSON column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonNullFilter {
    /// Column is SQL `NULL`.
    DbNull,
    /// Column holds the JSON literal `null`.
    JsonNull,
    /// Either of the above.
    AnyNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => " = ",
            CompareOp::Ne => " <> ",
            CompareOp::Lt => " < ",
            CompareOp::Lte => " <= ",
            CompareOp::Gt => " > ",
            CompareOp::Gte => " >= ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMatch {
    Contains,
    StartsWith,
    EndsWith,
}

/// A `WHERE` predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
        negated: bool,
    },
    Text {
        field: String,
        mode: TextMatch,
        needle: String,
    },
    JsonNull {
        field: String,
        which: JsonNullFilter,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::And(Vec::new())
    }
}

impl Filter {
    fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Filter::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Equality; a `Value::Null` operand tests `IS NULL`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::compare(field, CompareOp::Ne, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::compare(field, CompareOp::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::compare(field, CompareOp::Lte, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::compare(field, CompareOp::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::compare(field, CompareOp::Gte, value)
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Filter::eq(field, Value::Null)
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Filter::ne(field, Value::Null)
    }

    pub fn is_in<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Filter::Text {
            field: field.into(),
            mode: TextMatch::Contains,
            needle: needle.into(),
        }
    }

    pub fn starts_with(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Filter::Text {
            field: field.into(),
            mode: TextMatch::StartsWith,
            needle: needle.into(),
        }
    }

    pub fn ends_with(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Filter::Text {
            field: field.into(),
            mode: TextMatch::EndsWith,
            needle: needle.into(),
        }
    }

    pub fn json_null(field: impl Into<String>, which: JsonNullFilter) -> Self {
        Filter::JsonNull {
            field: field.into(),
            which,
        }
    }

    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Conjunction of `self` and `other`, flattening nested `And`s.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut filters) => {
                filters.push(other);
                Filter::And(filters)
            }
            filter => Filter::And(vec![filter, other]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    fn reversed(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => " ASC",
            SortOrder::Desc => " DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub order: SortOrder,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        OrderBy {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        OrderBy {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Selects at most one row through the identity or a declared unique key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UniqueWhere {
    pub fields: Vec<(String, Value)>,
}

impl UniqueWhere {
    pub fn by(field: impl Into<String>, value: impl Into<Value>) -> Self {
        UniqueWhere::default().and(field, value)
    }

    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    fn as_filter(&self) -> Filter {
        Filter::all(
            self.fields
                .iter()
                .map(|(field, value)| Filter::eq(field.clone(), value.clone())),
        )
    }

    /// Checks that the selector names exactly one declared key and carries no nulls.
    pub fn validate(&self, desc: &ModelDescriptor) -> StoreResult<()> {
        let columns: Vec<&str> = self.fields.iter().map(|(name, _)| name.as_str()).collect();
        for column in &columns {
            desc.require_field(column)?;
        }
        let matches_key = desc.unique_key_for(&columns).is_some();
        let has_null = self.fields.iter().any(|(_, value)| value.is_null());
        if !matches_key || has_null {
            return Err(StoreError::InvalidSelector {
                model: desc.name,
                fields: columns.join(", "),
            });
        }
        Ok(())
    }
}

/// One column assignment in an update.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(Value),
    Increment(i64),
    /// Writes the value only where the column is NULL; inserts it as given.
    SetIfNull(Value),
}

/// Column assignments for an insert or update.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Changes {
    entries: Vec<(String, FieldUpdate)>,
}

impl Changes {
    pub fn new() -> Self {
        Changes::default()
    }

    /// Assigns `value`, replacing an earlier assignment to the same field.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(field, FieldUpdate::Set(value.into()));
        self
    }

    /// Assigns `value` only where the column is still NULL.
    pub fn set_if_null(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(field, FieldUpdate::SetIfNull(value.into()));
        self
    }

    pub fn increment(mut self, field: impl Into<String>, by: i64) -> Self {
        self.put(field, FieldUpdate::Increment(by));
        self
    }

    pub fn put(&mut self, field: impl Into<String>, update: FieldUpdate) {
        let field = field.into();
        match self.entries.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = update,
            None => self.entries.push((field, update)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldUpdate> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, update)| update)
    }

    /// The value assigned by a plain `Set`, if any.
    pub fn value(&self, field: &str) -> Option<&Value> {
        match self.get(field) {
            Some(FieldUpdate::Set(value)) => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldUpdate)> {
        self.entries
            .iter()
            .map(|(name, update)| (name.as_str(), update))
    }

    pub(crate) fn from_values(values: Vec<(&'static str, Value)>) -> Self {
        Changes {
            entries: values
                .into_iter()
                .map(|(name, value)| (name.to_owned(), FieldUpdate::Set(value)))
                .collect(),
        }
    }
}

/// Arguments of a list query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindManyArgs {
    pub filter: Filter,
    pub order_by: Vec<OrderBy>,
    pub skip: Option<u64>,
    /// Negative values read backwards from the cursor (or the end).
    pub take: Option<i64>,
    /// Row the page starts at, inclusive.
    pub cursor: Option<UniqueWhere>,
}

impl FindManyArgs {
    pub fn new() -> Self {
        FindManyArgs::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn take(mut self, take: i64) -> Self {
        self.take = Some(take);
        self
    }

    pub fn cursor(mut self, cursor: UniqueWhere) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

/// Aggregates to compute over a row set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregateSpec {
    pub count: bool,
    pub min: Vec<String>,
    pub max: Vec<String>,
    pub sum: Vec<String>,
    pub avg: Vec<String>,
}

impl AggregateSpec {
    pub fn count() -> Self {
        AggregateSpec {
            count: true,
            ..AggregateSpec::default()
        }
    }

    pub fn min(mut self, field: impl Into<String>) -> Self {
        self.min.push(field.into());
        self
    }

    pub fn max(mut self, field: impl Into<String>) -> Self {
        self.max.push(field.into());
        self
    }

    pub fn sum(mut self, field: impl Into<String>) -> Self {
        self.sum.push(field.into());
        self
    }

    pub fn avg(mut self, field: impl Into<String>) -> Self {
        self.avg.push(field.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AggregateResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    pub min: BTreeMap<String, Value>,
    pub max: BTreeMap<String, Value>,
    pub sum: BTreeMap<String, Value>,
    pub avg: BTreeMap<String, Value>,
}

/// Restricts groups by their row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HavingCount {
    pub op: CompareOp,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupByArgs {
    pub by: Vec<String>,
    pub filter: Filter,
    pub aggregates: AggregateSpec,
    pub having: Option<HavingCount>,
    /// Only fields listed in `by` may be used.
    pub order_by: Vec<OrderBy>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRow {
    pub keys: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub aggregates: AggregateResult,
}

pub(crate) fn push_value(qb: &mut QueryBuilder<'_, Sqlite>, value: Value) {
    match value {
        Value::Null => qb.push_bind(Option::<String>::None),
        Value::Bool(value) => qb.push_bind(value),
        Value::Int(value) => qb.push_bind(value),
        Value::Float(value) => qb.push_bind(value),
        Value::Text(value) => qb.push_bind(value),
        Value::DateTime(value) => qb.push_bind(value),
        Value::Json(value) => qb.push_bind(Json(value)),
    };
}

fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for ch in needle.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Appends `filter` as a parenthesized boolean expression.
pub(crate) fn push_filter(
    qb: &mut QueryBuilder<'_, Sqlite>,
    desc: &ModelDescriptor,
    filter: &Filter,
) -> StoreResult<()> {
    match filter {
        Filter::Compare { field, op, value } => {
            let target = desc.require_field(field)?;
            let kind = target.kind;
            target.check_value(desc.name, value)?;
            qb.push(quote(field));
            match (op, value) {
                (CompareOp::Eq, Value::Null) => {
                    qb.push(" IS NULL");
                }
                (CompareOp::Ne, Value::Null) => {
                    qb.push(" IS NOT NULL");
                }
                (_, Value::Null) => {
                    return Err(StoreError::InvalidArgument {
                        model: desc.name,
                        reason: format!("`{field}` can only be compared to null for equality"),
                    });
                }
                (_, value) => {
                    if kind == FieldKind::Json && !matches!(op, CompareOp::Eq | CompareOp::Ne) {
                        return Err(StoreError::InvalidArgument {
                            model: desc.name,
                            reason: format!("JSON field `{field}` supports only equality"),
                        });
                    }
                    qb.push(op.sql());
                    push_value(qb, value.clone());
                }
            }
        }
        Filter::In {
            field,
            values,
            negated,
        } => {
            let target = desc.require_field(field)?;
            for value in values {
                target.check_value(desc.name, value)?;
            }
            if values.is_empty() {
                // `x IN ()` matches nothing, `x NOT IN ()` matches everything
                qb.push(if *negated { "1" } else { "0" });
                return Ok(());
            }
            qb.push(quote(field));
            qb.push(if *negated { " NOT IN (" } else { " IN (" });
            let mut separated = qb.separated(", ");
            for value in values {
                match value.clone() {
                    Value::Null => separated.push_bind(Option::<String>::None),
                    Value::Bool(value) => separated.push_bind(value),
                    Value::Int(value) => separated.push_bind(value),
                    Value::Float(value) => separated.push_bind(value),
                    Value::Text(value) => separated.push_bind(value),
                    Value::DateTime(value) => separated.push_bind(value),
                    Value::Json(value) => separated.push_bind(Json(value)),
                };
            }
            separated.push_unseparated(")");
        }
        Filter::Text {
            field,
            mode,
            needle,
        } => {
            let kind = desc.require_field(field)?.kind;
            if !matches!(kind, FieldKind::Text | FieldKind::Enum(_)) {
                return Err(StoreError::InvalidArgument {
                    model: desc.name,
                    reason: format!("`{field}` is not a text field"),
                });
            }
            let pattern = match mode {
                TextMatch::Contains => format!("%{}%", escape_like(needle)),
                TextMatch::StartsWith => format!("{}%", escape_like(needle)),
                TextMatch::EndsWith => format!("%{}", escape_like(needle)),
            };
            qb.push(quote(field));
            qb.push(" LIKE ");
            qb.push_bind(pattern);
            qb.push(" ESCAPE '\\'");
        }
        Filter::JsonNull { field, which } => {
            let target = desc.require_field(field)?;
            if target.kind != FieldKind::Json || !target.nullable {
                return Err(StoreError::InvalidArgument {
                    model: desc.name,
                    reason: format!("`{field}` is not a nullable JSON field"),
                });
            }
            let column = quote(field);
            match which {
                JsonNullFilter::DbNull => qb.push(format!("{column} IS NULL")),
                JsonNullFilter::JsonNull => qb.push(format!("{column} = 'null'")),
                JsonNullFilter::AnyNull => {
                    qb.push(format!("({column} IS NULL OR {column} = 'null')"))
                }
            };
        }
        Filter::And(filters) | Filter::Or(filters) => {
            if filters.is_empty() {
                qb.push(if matches!(filter, Filter::And(_)) { "1" } else { "0" });
                return Ok(());
            }
            let joiner = if matches!(filter, Filter::And(_)) {
                " AND "
            } else {
                " OR "
            };
            qb.push("(");
            for (index, inner) in filters.iter().enumerate() {
                if index > 0 {
                    qb.push(joiner);
                }
                push_filter(qb, desc, inner)?;
            }
            qb.push(")");
        }
        Filter::Not(inner) => {
            qb.push("NOT (");
            push_filter(qb, desc, inner)?;
            qb.push(")");
        }
    }
    Ok(())
}

pub(crate) fn push_unique(
    qb: &mut QueryBuilder<'_, Sqlite>,
    desc: &ModelDescriptor,
    selector: &UniqueWhere,
) -> StoreResult<()> {
    selector.validate(desc)?;
    push_filter(qb, desc, &selector.as_filter())
}

/// Appends the `SET` list of an update.
pub(crate) fn push_assignments(
    qb: &mut QueryBuilder<'_, Sqlite>,
    desc: &ModelDescriptor,
    changes: &Changes,
) -> StoreResult<()> {
    if changes.is_empty() {
        return Err(StoreError::InvalidArgument {
            model: desc.name,
            reason: "update has no fields".to_owned(),
        });
    }
    for (index, (field, update)) in changes.iter().enumerate() {
        let target = desc.require_field(field)?;
        let kind = target.kind;
        if index > 0 {
            qb.push(", ");
        }
        let column = quote(field);
        match update {
            FieldUpdate::Set(value) => {
                target.check_value(desc.name, value)?;
                qb.push(format!("{column} = "));
                push_value(qb, value.clone());
            }
            FieldUpdate::SetIfNull(value) => {
                target.check_value(desc.name, value)?;
                qb.push(format!("{column} = COALESCE({column}, "));
                push_value(qb, value.clone());
                qb.push(")");
            }
            FieldUpdate::Increment(by) => {
                if !kind.is_numeric() {
                    return Err(StoreError::InvalidArgument {
                        model: desc.name,
                        reason: format!("cannot increment non-numeric field `{field}`"),
                    });
                }
                qb.push(format!("{column} = {column} + "));
                qb.push_bind(*by);
            }
        }
    }
    Ok(())
}

/// Appends `INSERT INTO t (cols) VALUES (...)` for a fully-specified row.
pub(crate) fn push_insert(
    qb: &mut QueryBuilder<'_, Sqlite>,
    desc: &ModelDescriptor,
    changes: &Changes,
) -> StoreResult<()> {
    let mut columns = Vec::new();
    let mut values = Vec::new();
    for (field, update) in changes.iter() {
        let target = desc.require_field(field)?;
        match update {
            FieldUpdate::Set(value) | FieldUpdate::SetIfNull(value) => {
                target.check_value(desc.name, value)?;
                columns.push(quote(field));
                values.push(value.clone());
            }
            FieldUpdate::Increment(_) => {
                return Err(StoreError::InvalidArgument {
                    model: desc.name,
                    reason: format!("cannot increment `{field}` on insert"),
                });
            }
        }
    }
    qb.push(format!(
        "INSERT INTO {} ({}) VALUES (",
        quote(desc.table),
        columns.join(", ")
    ));
    let mut separated = qb.separated(", ");
    for value in values {
        match value {
            Value::Null => separated.push_bind(Option::<String>::None),
            Value::Bool(value) => separated.push_bind(value),
            Value::Int(value) => separated.push_bind(value),
            Value::Float(value) => separated.push_bind(value),
            Value::Text(value) => separated.push_bind(value),
            Value::DateTime(value) => separated.push_bind(value),
            Value::Json(value) => separated.push_bind(Json(value)),
        };
    }
    separated.push_unseparated(")");
    Ok(())
}

pub(crate) fn push_order_by(
    qb: &mut QueryBuilder<'_, Sqlite>,
    desc: &ModelDescriptor,
    order_by: &[OrderBy],
) -> StoreResult<()> {
    if order_by.is_empty() {
        return Ok(());
    }
    qb.push(" ORDER BY ");
    for (index, order) in order_by.iter().enumerate() {
        desc.require_field(&order.field)?;
        if index > 0 {
            qb.push(", ");
        }
        qb.push(quote(&order.field));
        qb.push(order.order.sql());
    }
    Ok(())
}

/// Ordering for a page query: the requested columns followed by any identity columns
/// not already present, flipped when reading backwards.
pub(crate) fn page_ordering(
    desc: &ModelDescriptor,
    order_by: &[OrderBy],
    backwards: bool,
) -> Vec<OrderBy> {
    let mut ordering: Vec<OrderBy> = order_by.to_vec();
    for column in desc.identity {
        if !ordering.iter().any(|order| order.field == *column) {
            ordering.push(OrderBy::asc(*column));
        }
    }
    if backwards {
        for order in &mut ordering {
            order.order = order.order.reversed();
        }
    }
    ordering
}

/// Appends the predicate selecting rows at or after the cursor row in `ordering`.
///
/// SQLite sorts `NULL` first, so in descending order nulls come after every value.
pub(crate) fn push_cursor_condition(
    qb: &mut QueryBuilder<'_, Sqlite>,
    ordering: &[OrderBy],
    cursor_values: &[Value],
) {
    qb.push("(");
    for index in 0..=ordering.len() {
        if index > 0 {
            qb.push(" OR ");
        }
        qb.push("(1");
        for (order, value) in ordering.iter().zip(cursor_values).take(index) {
            qb.push(format!(" AND {} IS ", quote(&order.field)));
            push_value(qb, value.clone());
        }
        if let (Some(order), Some(value)) = (ordering.get(index), cursor_values.get(index)) {
            let column = quote(&order.field);
            match (order.order, value) {
                (SortOrder::Asc, Value::Null) => {
                    qb.push(format!(" AND {column} IS NOT NULL"));
                }
                (SortOrder::Asc, value) => {
                    qb.push(format!(" AND {column} > "));
                    push_value(qb, value.clone());
                }
                (SortOrder::Desc, Value::Null) => {
                    qb.push(" AND 0");
                }
                (SortOrder::Desc, value) => {
                    qb.push(format!(" AND ({column} < "));
                    push_value(qb, value.clone());
                    qb.push(format!(" OR {column} IS NULL)"));
                }
            }
        }
        qb.push(")");
    }
    qb.push(")");
}

/// Reads a column into a [`Value`] according to its declared kind.
pub(crate) fn decode_value(
    row: &SqliteRow,
    column: &str,
    kind: FieldKind,
) -> Result<Value, sqlx::Error> {
    let value = match kind {
        FieldKind::Text | FieldKind::Enum(_) => row.try_get::<Option<String>, _>(column)?.into(),
        FieldKind::Integer => row.try_get::<Option<i64>, _>(column)?.into(),
        FieldKind::Boolean => row.try_get::<Option<bool>, _>(column)?.into(),
        FieldKind::DateTime => row.try_get::<Option<DateTime<Utc>>, _>(column)?.into(),
        FieldKind::Json => match row.try_get::<Option<Json<serde_json::Value>>, _>(column)? {
            Some(Json(value)) => Value::Json(value),
            None => Value::Null,
        },
    };
    Ok(value)
}
