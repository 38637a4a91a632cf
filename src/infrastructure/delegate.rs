//! Generic data access over any [`Model`]
//!
//! A [`Delegate`] offers the same operations for every table; the model's descriptor
//! supplies table, column and key names.

use crate::infrastructure::error::{StoreError, StoreResult};
use crate::infrastructure::query::{
    AggregateResult, AggregateSpec, Changes, FieldUpdate, FindManyArgs, Filter, GroupByArgs,
    GroupRow, OrderBy, UniqueWhere, Value, decode_value, page_ordering, push_assignments,
    push_cursor_condition, push_filter, push_insert, push_order_by, push_unique,
};
use crate::infrastructure::schema::{FieldKind, Model, ModelDescriptor, quote};
use chrono::Utc;
use log::{debug, error};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::marker::PhantomData;

pub struct Delegate<'a, M> {
    pool: &'a SqlitePool,
    model: PhantomData<fn() -> M>,
}

impl<M> Clone for Delegate<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for Delegate<'_, M> {}

fn db_error(desc: &ModelDescriptor) -> impl Fn(sqlx::Error) -> StoreError + '_ {
    move |err| {
        let err = StoreError::from_sqlx(desc.name, err);
        if matches!(err, StoreError::Database(_)) {
            error!("{}: {err}", desc.name);
        }
        err
    }
}

/// SQLite binds LIMIT and OFFSET as signed integers; larger counts saturate.
fn row_count(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn select_from(desc: &ModelDescriptor) -> QueryBuilder<'static, Sqlite> {
    QueryBuilder::new(format!("SELECT * FROM {} WHERE ", quote(desc.table)))
}

impl<'a, M: Model> Delegate<'a, M> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Delegate {
            pool,
            model: PhantomData,
        }
    }

    fn desc() -> &'static ModelDescriptor {
        M::DESCRIPTOR
    }

    async fn conn(&self) -> StoreResult<sqlx::pool::PoolConnection<Sqlite>> {
        self.pool.acquire().await.map_err(db_error(Self::desc()))
    }

    async fn begin(&self) -> StoreResult<sqlx::Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(db_error(Self::desc()))
    }


    pub async fn find_unique(&self, selector: &UniqueWhere) -> StoreResult<Option<M>> {
        let mut conn = self.conn().await?;
        Self::find_unique_in(&mut conn, selector).await
    }

    pub async fn find_unique_or_throw(&self, selector: &UniqueWhere) -> StoreResult<M> {
        self.find_unique(selector)
            .await?
            .ok_or(StoreError::NotFound {
                model: Self::desc().name,
            })
    }

    pub async fn find_first(&self, args: FindManyArgs) -> StoreResult<Option<M>> {
        Ok(self.find_many(args.take(1)).await?.into_iter().next())
    }

    pub async fn find_first_or_throw(&self, args: FindManyArgs) -> StoreResult<M> {
        self.find_first(args).await?.ok_or(StoreError::NotFound {
            model: Self::desc().name,
        })
    }

    pub async fn find_many(&self, args: FindManyArgs) -> StoreResult<Vec<M>> {
        let desc = Self::desc();
        let mut conn = self.conn().await?;
        let backwards = args.take.is_some_and(|take| take < 0);
        let ordering = page_ordering(desc, &args.order_by, backwards);

        let mut qb = select_from(desc);
        push_filter(&mut qb, desc, &args.filter)?;
        if let Some(cursor) = &args.cursor {
            let Some(cursor_values) = Self::cursor_values(&mut conn, cursor, &ordering).await?
            else {
                return Ok(Vec::new());
            };
            qb.push(" AND ");
            push_cursor_condition(&mut qb, &ordering, &cursor_values);
        }
        push_order_by(&mut qb, desc, &ordering)?;
        qb.push(" LIMIT ");
        qb.push_bind(args.take.map_or(-1, |take| row_count(take.unsigned_abs())));
        qb.push(" OFFSET ");
        qb.push_bind(args.skip.map_or(0, row_count));

        debug!("{}", qb.sql());
        let mut rows: Vec<M> = qb
            .build_query_as::<M>()
            .fetch_all(&mut *conn)
            .await
            .map_err(db_error(desc))?;
        if backwards {
            rows.reverse();
        }
        Ok(rows)
    }

    /// Rows whose foreign key to `P` equals `parent_key`.
    pub async fn find_by_parent<P: Model>(
        &self,
        parent_key: impl Into<Value>,
        args: FindManyArgs,
    ) -> StoreResult<Vec<M>> {
        let desc = Self::desc();
        let parent = P::DESCRIPTOR;
        let relation = desc
            .relation_to(parent.table)
            .ok_or_else(|| StoreError::InvalidArgument {
                model: desc.name,
                reason: format!("no relation to {}", parent.name),
            })?;
        let mut args = args;
        args.filter = std::mem::take(&mut args.filter).and(Filter::eq(relation.field, parent_key));
        self.find_many(args).await
    }

    pub async fn count(&self, filter: &Filter) -> StoreResult<i64> {
        let desc = Self::desc();
        let mut qb = QueryBuilder::new(format!(
            "SELECT COUNT(*) FROM {} WHERE ",
            quote(desc.table)
        ));
        push_filter(&mut qb, desc, filter)?;
        debug!("{}", qb.sql());
        qb.build_query_scalar::<i64>()
            .fetch_one(self.pool)
            .await
            .map_err(db_error(desc))
    }

    pub async fn aggregate(
        &self,
        filter: &Filter,
        spec: &AggregateSpec,
    ) -> StoreResult<AggregateResult> {
        let desc = Self::desc();
        let columns = aggregate_columns(desc, spec)?;
        if columns.is_empty() {
            return Err(StoreError::InvalidArgument {
                model: desc.name,
                reason: "aggregate selects nothing".to_owned(),
            });
        }
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(aggregate_select(&columns));
        qb.push(format!(" FROM {} WHERE ", quote(desc.table)));
        push_filter(&mut qb, desc, filter)?;
        debug!("{}", qb.sql());
        let row: SqliteRow = qb
            .build()
            .fetch_one(self.pool)
            .await
            .map_err(db_error(desc))?;
        read_aggregates(&row, &columns).map_err(db_error(desc))
    }

    pub async fn group_by(&self, args: &GroupByArgs) -> StoreResult<Vec<GroupRow>> {
        let desc = Self::desc();
        if args.by.is_empty() {
            return Err(StoreError::InvalidArgument {
                model: desc.name,
                reason: "group_by needs at least one field".to_owned(),
            });
        }
        let mut keys = Vec::with_capacity(args.by.len());
        for field in &args.by {
            keys.push((field.as_str(), desc.require_field(field)?.kind));
        }
        if let Some(order) = args.order_by.iter().find(|order| !args.by.contains(&order.field)) {
            return Err(StoreError::InvalidArgument {
                model: desc.name,
                reason: format!("cannot order groups by `{}`", order.field),
            });
        }
        let columns = aggregate_columns(desc, &args.aggregates)?;
        let key_list = args
            .by
            .iter()
            .map(|field| quote(field))
            .collect::<Vec<_>>()
            .join(", ");

        let mut qb = QueryBuilder::new(format!("SELECT {key_list}"));
        if !columns.is_empty() {
            qb.push(", ");
            qb.push(aggregate_select(&columns));
        }
        qb.push(format!(" FROM {} WHERE ", quote(desc.table)));
        push_filter(&mut qb, desc, &args.filter)?;
        qb.push(format!(" GROUP BY {key_list}"));
        if let Some(having) = args.having {
            qb.push(" HAVING COUNT(*)");
            qb.push(having.op.sql());
            qb.push_bind(having.value);
        }
        push_order_by(&mut qb, desc, &args.order_by)?;
        qb.push(" LIMIT ");
        qb.push_bind(args.take.map_or(-1, row_count));
        qb.push(" OFFSET ");
        qb.push_bind(args.skip.map_or(0, row_count));

        debug!("{}", qb.sql());
        let rows = qb
            .build()
            .fetch_all(self.pool)
            .await
            .map_err(db_error(desc))?;
        rows.iter()
            .map(|row| -> Result<GroupRow, sqlx::Error> {
                let mut group_keys = BTreeMap::new();
                for (field, kind) in &keys {
                    group_keys.insert((*field).to_owned(), decode_value(row, field, *kind)?);
                }
                Ok(GroupRow {
                    keys: group_keys,
                    aggregates: read_aggregates(row, &columns)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error(desc))
    }


    pub async fn create(&self, row: &M) -> StoreResult<M> {
        let mut conn = self.conn().await?;
        let created = Self::insert_in(&mut conn, row, false).await?;
        created.ok_or(StoreError::NotFound {
            model: Self::desc().name,
        })
    }

    /// Inserts all rows in one transaction and returns how many were written.
    ///
    /// With `skip_duplicates`, rows hitting a unique constraint are left out instead of
    /// failing the batch.
    pub async fn create_many(&self, rows: &[M], skip_duplicates: bool) -> StoreResult<u64> {
        Ok(self
            .create_many_and_return(rows, skip_duplicates)
            .await?
            .len() as u64)
    }

    pub async fn create_many_and_return(
        &self,
        rows: &[M],
        skip_duplicates: bool,
    ) -> StoreResult<Vec<M>> {
        let mut tx = self.begin().await?;
        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            match Self::insert_in(&mut tx, row, skip_duplicates).await {
                Ok(Some(row)) => created.push(row),
                Ok(None) => {}
                Err(err) => {
                    tx.rollback().await.map_err(db_error(Self::desc()))?;
                    return Err(err);
                }
            }
        }
        tx.commit().await.map_err(db_error(Self::desc()))?;
        Ok(created)
    }

    pub async fn update(&self, selector: &UniqueWhere, changes: Changes) -> StoreResult<M> {
        let mut conn = self.conn().await?;
        Self::update_in(&mut conn, selector, changes).await
    }

    pub async fn update_many(&self, filter: &Filter, changes: Changes) -> StoreResult<u64> {
        let desc = Self::desc();
        let mut qb = Self::update_statement(filter, changes)?;
        debug!("{}", qb.sql());
        let result = qb
            .build()
            .execute(self.pool)
            .await
            .map_err(db_error(desc))?;
        Ok(result.rows_affected())
    }

    pub async fn update_many_and_return(
        &self,
        filter: &Filter,
        changes: Changes,
    ) -> StoreResult<Vec<M>> {
        let desc = Self::desc();
        let mut qb = Self::update_statement(filter, changes)?;
        qb.push(" RETURNING *");
        debug!("{}", qb.sql());
        qb.build_query_as::<M>()
            .fetch_all(self.pool)
            .await
            .map_err(db_error(desc))
    }

    /// Updates the row matched by `selector`, or inserts `create` when there is none.
    pub async fn upsert(
        &self,
        selector: &UniqueWhere,
        create: &M,
        update: Changes,
    ) -> StoreResult<M> {
        let desc = Self::desc();
        let mut tx = self.begin().await?;
        let existing = Self::find_unique_in(&mut tx, selector).await?;
        let row = match existing {
            Some(_) => Self::update_in(&mut tx, selector, update).await?,
            None => Self::insert_in(&mut tx, create, false)
                .await?
                .ok_or(StoreError::NotFound { model: desc.name })?,
        };
        tx.commit().await.map_err(db_error(desc))?;
        Ok(row)
    }

    /// Deletes one row and returns it. Children go with it through the cascading keys.
    pub async fn delete(&self, selector: &UniqueWhere) -> StoreResult<M> {
        let desc = Self::desc();
        let mut qb = QueryBuilder::new(format!("DELETE FROM {} WHERE ", quote(desc.table)));
        push_unique(&mut qb, desc, selector)?;
        qb.push(" RETURNING *");
        debug!("{}", qb.sql());
        qb.build_query_as::<M>()
            .fetch_optional(self.pool)
            .await
            .map_err(db_error(desc))?
            .ok_or(StoreError::NotFound { model: desc.name })
    }

    /// Deletes matching rows, at most `limit` of them when given.
    pub async fn delete_many(&self, filter: &Filter, limit: Option<u64>) -> StoreResult<u64> {
        let desc = Self::desc();
        let table = quote(desc.table);
        let mut qb = QueryBuilder::new(format!(
            "DELETE FROM {table} WHERE rowid IN (SELECT rowid FROM {table} WHERE "
        ));
        push_filter(&mut qb, desc, filter)?;
        qb.push(" LIMIT ");
        qb.push_bind(limit.map_or(-1, row_count));
        qb.push(")");
        debug!("{}", qb.sql());
        let result = qb
            .build()
            .execute(self.pool)
            .await
            .map_err(db_error(desc))?;
        Ok(result.rows_affected())
    }


    pub async fn create_with(conn: &mut SqliteConnection, row: &M) -> StoreResult<M> {
        Self::insert_in(conn, row, false)
            .await?
            .ok_or(StoreError::NotFound {
                model: Self::desc().name,
            })
    }

    pub async fn update_with(
        conn: &mut SqliteConnection,
        selector: &UniqueWhere,
        changes: Changes,
    ) -> StoreResult<M> {
        Self::update_in(conn, selector, changes).await
    }


    async fn find_unique_in(
        conn: &mut SqliteConnection,
        selector: &UniqueWhere,
    ) -> StoreResult<Option<M>> {
        let desc = Self::desc();
        let mut qb = select_from(desc);
        push_unique(&mut qb, desc, selector)?;
        debug!("{}", qb.sql());
        qb.build_query_as::<M>()
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error(desc))
    }

    /// `None` when `skip_duplicates` swallowed a conflict.
    async fn insert_in(
        conn: &mut SqliteConnection,
        row: &M,
        skip_duplicates: bool,
    ) -> StoreResult<Option<M>> {
        let desc = Self::desc();
        let mut changes = Changes::from_values(row.to_values());
        M::normalize_write(&mut changes, Utc::now())?;
        let mut qb = QueryBuilder::new("");
        push_insert(&mut qb, desc, &changes)?;
        if skip_duplicates {
            qb.push(" ON CONFLICT DO NOTHING");
        }
        qb.push(" RETURNING *");
        debug!("{}", qb.sql());
        qb.build_query_as::<M>()
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error(desc))
    }

    async fn update_in(
        conn: &mut SqliteConnection,
        selector: &UniqueWhere,
        changes: Changes,
    ) -> StoreResult<M> {
        let desc = Self::desc();
        selector.validate(desc)?;
        let mut qb = Self::update_statement(&Filter::default(), changes)?;
        qb.push(" AND ");
        push_unique(&mut qb, desc, selector)?;
        qb.push(" RETURNING *");
        debug!("{}", qb.sql());
        qb.build_query_as::<M>()
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error(desc))?
            .ok_or(StoreError::NotFound { model: desc.name })
    }

    /// `UPDATE t SET ... WHERE <filter>` with write normalization and `updated_at` refresh.
    fn update_statement(
        filter: &Filter,
        mut changes: Changes,
    ) -> StoreResult<QueryBuilder<'static, Sqlite>> {
        let desc = Self::desc();
        if let Some(created_at) = desc.created_at {
            if changes.contains(created_at) {
                return Err(StoreError::InvalidArgument {
                    model: desc.name,
                    reason: format!("`{created_at}` cannot change after creation"),
                });
            }
        }
        let now = Utc::now();
        M::normalize_write(&mut changes, now)?;
        if let Some(updated_at) = desc.updated_at {
            if !changes.contains(updated_at) {
                changes.put(updated_at, FieldUpdate::Set(now.into()));
            }
        }

        let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", quote(desc.table)));
        push_assignments(&mut qb, desc, &changes)?;
        qb.push(" WHERE ");
        push_filter(&mut qb, desc, filter)?;
        Ok(qb)
    }

    /// Values of the cursor row in the page ordering, or `None` if the row is gone.
    async fn cursor_values(
        conn: &mut SqliteConnection,
        cursor: &UniqueWhere,
        ordering: &[OrderBy],
    ) -> StoreResult<Option<Vec<Value>>> {
        let desc = Self::desc();
        let mut qb = select_from(desc);
        push_unique(&mut qb, desc, cursor)?;
        let row: Option<SqliteRow> = qb
            .build()
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error(desc))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut values = Vec::with_capacity(ordering.len());
        for order in ordering {
            let kind = desc.require_field(&order.field)?.kind;
            values.push(decode_value(&row, &order.field, kind).map_err(db_error(desc))?);
        }
        Ok(Some(values))
    }
}

#[derive(Clone, Copy)]
enum AggregateFn {
    Min,
    Max,
    Sum,
    Avg,
}

struct AggregateColumn {
    function: AggregateFn,
    field: String,
    kind: FieldKind,
    alias: String,
}

fn aggregate_columns(
    desc: &ModelDescriptor,
    spec: &AggregateSpec,
) -> StoreResult<Vec<Option<AggregateColumn>>> {
    let mut columns = Vec::new();
    if spec.count {
        columns.push(None);
    }
    let groups = [
        (AggregateFn::Min, "min", &spec.min),
        (AggregateFn::Max, "max", &spec.max),
        (AggregateFn::Sum, "sum", &spec.sum),
        (AggregateFn::Avg, "avg", &spec.avg),
    ];
    for (function, prefix, fields) in groups {
        for field in fields {
            let kind = desc.require_field(field)?.kind;
            let numeric_only = matches!(function, AggregateFn::Sum | AggregateFn::Avg);
            if (numeric_only && !kind.is_numeric()) || kind == FieldKind::Json {
                return Err(StoreError::InvalidArgument {
                    model: desc.name,
                    reason: format!("cannot compute {prefix} of `{field}`"),
                });
            }
            columns.push(Some(AggregateColumn {
                function,
                field: field.clone(),
                kind,
                alias: format!("_{prefix}_{field}"),
            }));
        }
    }
    Ok(columns)
}

fn aggregate_select(columns: &[Option<AggregateColumn>]) -> String {
    columns
        .iter()
        .map(|column| match column {
            None => "COUNT(*) AS \"_count\"".to_owned(),
            Some(column) => {
                let function = match column.function {
                    AggregateFn::Min => "MIN",
                    AggregateFn::Max => "MAX",
                    AggregateFn::Sum => "SUM",
                    AggregateFn::Avg => "AVG",
                };
                format!("{function}({}) AS {}", quote(&column.field), quote(&column.alias))
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_aggregates(
    row: &SqliteRow,
    columns: &[Option<AggregateColumn>],
) -> Result<AggregateResult, sqlx::Error> {
    use sqlx::Row;

    let mut result = AggregateResult::default();
    for column in columns {
        let Some(column) = column else {
            result.count = Some(row.try_get("_count")?);
            continue;
        };
        let alias = column.alias.as_str();
        let (target, value) = match column.function {
            AggregateFn::Min => (&mut result.min, decode_value(row, alias, column.kind)?),
            AggregateFn::Max => (&mut result.max, decode_value(row, alias, column.kind)?),
            AggregateFn::Sum => (&mut result.sum, decode_value(row, alias, column.kind)?),
            AggregateFn::Avg => (
                &mut result.avg,
                row.try_get::<Option<f64>, _>(alias)?.into(),
            ),
        };
        target.insert(column.field.clone(), value);
    }
    Ok(result)
}
