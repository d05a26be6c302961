//! Transactions and the generic data operations that run inside them
//!
//! A [`Transaction`] owns one pooled connection inside an open database
//! transaction. Nothing here commits on its own: `commit()` (or the `Ok` exit
//! of [`crate::Pool::transaction`]) is the only commit point.
//!
//! Recoverable operations (everything except `insert`, `execute_script` and
//! `vector_support`) run inside a savepoint. A failing statement rolls back to
//! its savepoint, is logged, and yields an empty/zero/`None`/`false` result
//! while the surrounding transaction stays usable.

use serde_json::Value;
use sqlx::postgres::{PgConnection, Postgres};
use sqlx::types::Json;
use sqlx::{Connection, Executor, PgPool, QueryBuilder, Row};
use tracing::{debug, warn};

use crate::criteria::{Criteria, ROW_ALIAS};
use crate::error::{StoreError, StoreResult};
use crate::ident::Ident;
use crate::schema::{ColumnKind, TableSchema};
use crate::similarity::{ScoredRecord, SimilarityQuery};
use crate::value::{bind_value, push_value, Record, SqlValue};

#[derive(sqlx::FromRow)]
struct RecordRow {
    record: Json<Record>,
}

#[derive(sqlx::FromRow)]
struct ScoredRow {
    record: Json<Record>,
    distance: f64,
}

/// One unit of work on one connection.
///
/// Dropping an unfinished transaction rolls it back and returns the
/// connection to the pool.
pub struct Transaction {
    inner: sqlx::Transaction<'static, Postgres>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) async fn begin(pool: &PgPool) -> StoreResult<Self> {
        let inner = pool.begin().await.map_err(StoreError::from_sqlx)?;
        debug!("transaction started");
        Ok(Self { inner })
    }

    pub async fn commit(self) -> StoreResult<()> {
        self.inner.commit().await.map_err(StoreError::from_sqlx)?;
        debug!("transaction committed");
        Ok(())
    }

    pub async fn rollback(self) -> StoreResult<()> {
        self.inner.rollback().await.map_err(StoreError::from_sqlx)?;
        debug!("transaction rolled back");
        Ok(())
    }

    /// Raw connection access for statements whose failures must propagate.
    pub(crate) fn connection(&mut self) -> &mut PgConnection {
        &mut *self.inner
    }

    async fn savepoint(&mut self) -> StoreResult<sqlx::Transaction<'_, Postgres>> {
        Connection::begin(&mut *self.inner)
            .await
            .map_err(StoreError::from_sqlx)
    }

    /// Run a statement that returns no rows. `false` if the backend rejected it.
    ///
    /// Placeholders are positional (`$1`, `$2`, ...).
    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StoreResult<bool> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param.clone());
        }

        let mut savepoint = self.savepoint().await?;
        let result = query.execute(&mut *savepoint).await;
        match settle(savepoint, result).await? {
            Ok(_) => Ok(true),
            Err(source) => {
                recovered("execute", "statement", source);
                Ok(false)
            }
        }
    }

    /// Run a row-returning statement (a `SELECT`, or DML with `RETURNING`).
    ///
    /// Each row comes back as a [`Record`]. Empty if the backend rejected it.
    pub async fn query(&mut self, sql: &str, params: &[SqlValue]) -> StoreResult<Vec<Record>> {
        let wrapped = wrap_returning(sql);
        let mut query = sqlx::query(&wrapped);
        for param in params {
            query = bind_value(query, param.clone());
        }

        let mut savepoint = self.savepoint().await?;
        let result = query.fetch_all(&mut *savepoint).await;
        match settle(savepoint, result).await? {
            Ok(rows) => rows
                .iter()
                .map(|row| {
                    row.try_get::<Json<Record>, _>("record")
                        .map(|json| json.0)
                        .map_err(|err| StoreError::query("query", "statement", err))
                })
                .collect(),
            Err(source) => {
                recovered("query", "statement", source);
                Ok(Vec::new())
            }
        }
    }

    /// Run a parameterless, possibly multi-statement script. Failures propagate.
    ///
    /// A bare `&str` carries no arguments, so it goes over the simple-query
    /// protocol, which accepts several statements.
    pub async fn execute_script(&mut self, sql: &str) -> StoreResult<()> {
        Executor::execute(&mut *self.inner, sql)
            .await
            .map(|_| ())
            .map_err(|err| StoreError::query("script", "transaction", err))
    }

    /// Insert one row and return it as stored (defaults and generated id included).
    ///
    /// # Errors
    ///
    /// `Insert` if the backend rejects the row; the statement is rolled back
    /// first. Schema violations are reported before anything is sent.
    pub async fn insert(&mut self, schema: &TableSchema, fields: &Record) -> StoreResult<Record> {
        let table = schema.name().plain();
        let mut builder = insert_statement(schema, fields)?;

        let mut savepoint = self.savepoint().await?;
        let result = builder
            .build_query_as::<RecordRow>()
            .fetch_one(&mut *savepoint)
            .await;
        match settle(savepoint, result).await? {
            Ok(row) => {
                debug!(table = %table, "row inserted");
                Ok(row.record.0)
            }
            Err(source) => {
                warn!(op = "insert", table = %table, error = %source, "insert rolled back");
                Err(StoreError::Insert { table, source })
            }
        }
    }

    /// Update matching rows. Returns the affected count; `0` means no match.
    pub async fn update(
        &mut self,
        schema: &TableSchema,
        fields: &Record,
        criteria: &Criteria,
    ) -> StoreResult<u64> {
        let table = schema.name().plain();
        let mut builder = update_statement(schema, fields, criteria)?;

        let mut savepoint = self.savepoint().await?;
        let result = builder.build().execute(&mut *savepoint).await;
        match settle(savepoint, result).await? {
            Ok(done) => Ok(done.rows_affected()),
            Err(source) => {
                recovered("update", &table, source);
                Ok(0)
            }
        }
    }

    /// Insert, or update the row that conflicts on `conflict_keys`.
    ///
    /// Returns the id of the inserted or existing row.
    pub async fn upsert(
        &mut self,
        schema: &TableSchema,
        fields: &Record,
        conflict_keys: &[&str],
    ) -> StoreResult<Option<Value>> {
        let table = schema.name().plain();
        let mut builder = upsert_statement(schema, fields, conflict_keys)?;

        let mut savepoint = self.savepoint().await?;
        let result = builder
            .build_query_scalar::<Json<Value>>()
            .fetch_one(&mut *savepoint)
            .await;
        match settle(savepoint, result).await? {
            Ok(id) => Ok(Some(id.0)),
            Err(source) => {
                recovered("upsert", &table, source);
                Ok(None)
            }
        }
    }

    /// Delete matching rows. Returns the affected count.
    pub async fn delete(&mut self, schema: &TableSchema, criteria: &Criteria) -> StoreResult<u64> {
        let table = schema.name().plain();
        let mut builder = delete_statement(schema, criteria)?;

        let mut savepoint = self.savepoint().await?;
        let result = builder.build().execute(&mut *savepoint).await;
        match settle(savepoint, result).await? {
            Ok(done) => Ok(done.rows_affected()),
            Err(source) => {
                recovered("delete", &table, source);
                Ok(0)
            }
        }
    }

    pub async fn get_by_id(
        &mut self,
        schema: &TableSchema,
        id: impl Into<Value>,
    ) -> StoreResult<Option<Record>> {
        let id = id.into();
        if id.is_null() {
            return Ok(None);
        }
        let table = schema.name().plain();
        let mut builder = get_by_id_statement(schema, &id)?;

        let mut savepoint = self.savepoint().await?;
        let result = builder
            .build_query_as::<RecordRow>()
            .fetch_optional(&mut *savepoint)
            .await;
        match settle(savepoint, result).await? {
            Ok(row) => Ok(row.map(|row| row.record.0)),
            Err(source) => {
                recovered("get_by_id", &table, source);
                Ok(None)
            }
        }
    }

    /// Rows matching every term of `criteria` (all rows when it is empty).
    pub async fn query_filtered(
        &mut self,
        schema: &TableSchema,
        criteria: &Criteria,
    ) -> StoreResult<Vec<Record>> {
        let table = schema.name().plain();
        let mut builder = filtered_statement(schema, criteria)?;

        let mut savepoint = self.savepoint().await?;
        let result = builder
            .build_query_as::<RecordRow>()
            .fetch_all(&mut *savepoint)
            .await;
        match settle(savepoint, result).await? {
            Ok(rows) => Ok(rows.into_iter().map(|row| row.record.0).collect()),
            Err(source) => {
                recovered("query_filtered", &table, source);
                Ok(Vec::new())
            }
        }
    }

    /// Up to `k` rows nearest to the query vector, closest first.
    ///
    /// Needs the pgvector extension; without it the statement fails and the
    /// result is empty. Check [`Transaction::vector_support`] first when unsure.
    pub async fn similarity_search(
        &mut self,
        schema: &TableSchema,
        query: &SimilarityQuery,
    ) -> StoreResult<Vec<ScoredRecord>> {
        let table = schema.name().plain();
        let mut builder = similarity_statement(schema, query)?;
        if query.k == 0 {
            return Ok(Vec::new());
        }

        let mut savepoint = self.savepoint().await?;
        let result = builder
            .build_query_as::<ScoredRow>()
            .fetch_all(&mut *savepoint)
            .await;
        match settle(savepoint, result).await? {
            Ok(rows) => Ok(rows
                .into_iter()
                .map(|row| ScoredRecord {
                    record: row.record.0,
                    distance: row.distance,
                })
                .collect()),
            Err(source) => {
                recovered("similarity_search", &table, source);
                Ok(Vec::new())
            }
        }
    }

    /// Whether the `vector` extension is installed in this database.
    pub async fn vector_support(&mut self) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'vector')",
        )
        .fetch_one(&mut *self.inner)
        .await
        .map_err(|err| StoreError::query("vector_support", "pg_extension", err))
    }
}

/// Release the savepoint on success, roll back to it on a statement failure.
///
/// Connection-level failures skip the rollback and propagate.
async fn settle<T>(
    savepoint: sqlx::Transaction<'_, Postgres>,
    result: Result<T, sqlx::Error>,
) -> StoreResult<Result<T, sqlx::Error>> {
    match result {
        Ok(value) => {
            savepoint.commit().await.map_err(StoreError::from_sqlx)?;
            Ok(Ok(value))
        }
        Err(err) if is_connection_level(&err) => Err(StoreError::from_sqlx(err)),
        Err(err) => {
            savepoint.rollback().await.map_err(StoreError::from_sqlx)?;
            Ok(Err(err))
        }
    }
}

fn is_connection_level(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed
    )
}

fn recovered(op: &'static str, target: &str, source: sqlx::Error) {
    let err = StoreError::query(op, target, source);
    warn!(op, table = %target, error = %err, "statement rolled back to savepoint");
}

/// Wrap a caller statement so every row comes back as one jsonb column.
fn wrap_returning(sql: &str) -> String {
    let statement = sql.trim().trim_end_matches(';').trim_end();
    // newline so a trailing `--` comment cannot swallow the closing paren
    format!("WITH q AS ({statement}\n) SELECT to_jsonb(q) AS record FROM q")
}

fn convert_fields(schema: &TableSchema, fields: &Record) -> StoreResult<Vec<(Ident, SqlValue)>> {
    let table = schema.name().plain();
    fields
        .iter()
        .map(|(column, value)| {
            let (ident, kind) = schema.column(column)?;
            Ok((ident.clone(), SqlValue::convert(&table, column, kind, value)?))
        })
        .collect()
}

fn push_column_list(builder: &mut QueryBuilder<'static, Postgres>, values: &[(Ident, SqlValue)]) {
    builder.push(" (");
    for (i, (ident, _)) in values.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push(ident.quoted());
    }
    builder.push(")");
}

fn push_value_list(builder: &mut QueryBuilder<'static, Postgres>, values: Vec<(Ident, SqlValue)>) {
    builder.push(" VALUES (");
    for (i, (_, value)) in values.into_iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        push_value(builder, value);
    }
    builder.push(")");
}

pub(crate) fn insert_statement(
    schema: &TableSchema,
    fields: &Record,
) -> StoreResult<QueryBuilder<'static, Postgres>> {
    let values = convert_fields(schema, fields)?;
    let mut builder = QueryBuilder::new(format!("INSERT INTO {} AS {ROW_ALIAS}", schema.name()));
    if values.is_empty() {
        builder.push(" DEFAULT VALUES");
    } else {
        push_column_list(&mut builder, &values);
        push_value_list(&mut builder, values);
    }
    builder.push(format_args!(" RETURNING to_jsonb({ROW_ALIAS}) AS record"));
    Ok(builder)
}

pub(crate) fn update_statement(
    schema: &TableSchema,
    fields: &Record,
    criteria: &Criteria,
) -> StoreResult<QueryBuilder<'static, Postgres>> {
    let table = schema.name().plain();
    if criteria.is_empty() {
        return Err(StoreError::UnboundedWrite { op: "update", table });
    }
    let values = convert_fields(schema, fields)?;
    if values.is_empty() {
        return Err(StoreError::schema(table, "update needs at least one field"));
    }

    let mut builder = QueryBuilder::new(format!("UPDATE {} AS {ROW_ALIAS} SET ", schema.name()));
    for (i, (ident, value)) in values.into_iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push(format_args!("{ident} = "));
        push_value(&mut builder, value);
    }
    criteria.push_where(schema, &mut builder)?;
    Ok(builder)
}

pub(crate) fn upsert_statement(
    schema: &TableSchema,
    fields: &Record,
    conflict_keys: &[&str],
) -> StoreResult<QueryBuilder<'static, Postgres>> {
    let table = schema.name().plain();
    if conflict_keys.is_empty() {
        return Err(StoreError::schema(table, "upsert needs at least one conflict key"));
    }
    let keys = conflict_keys
        .iter()
        .map(|key| schema.column(key).map(|(ident, _)| ident.clone()))
        .collect::<StoreResult<Vec<_>>>()?;
    let values = convert_fields(schema, fields)?;
    if values.is_empty() {
        return Err(StoreError::schema(table, "upsert needs at least one field"));
    }

    let updates: Vec<Ident> = values
        .iter()
        .map(|(ident, _)| ident.clone())
        .filter(|ident| !keys.contains(ident))
        .collect();

    let mut builder = QueryBuilder::new(format!("INSERT INTO {} AS {ROW_ALIAS}", schema.name()));
    push_column_list(&mut builder, &values);
    push_value_list(&mut builder, values);

    let key_list = keys.iter().map(Ident::quoted).collect::<Vec<_>>().join(", ");
    builder.push(format_args!(" ON CONFLICT ({key_list}) DO UPDATE SET "));
    // nothing but keys: touch a key so RETURNING still yields the existing row
    let assigned = if updates.is_empty() { &keys[..1] } else { &updates[..] };
    let assignments = assigned
        .iter()
        .map(|ident| format!("{ident} = EXCLUDED.{ident}"))
        .collect::<Vec<_>>()
        .join(", ");
    builder.push(assignments);
    builder.push(format_args!(
        " RETURNING to_jsonb({ROW_ALIAS}.{}) AS id",
        schema.id_column()
    ));
    Ok(builder)
}

pub(crate) fn delete_statement(
    schema: &TableSchema,
    criteria: &Criteria,
) -> StoreResult<QueryBuilder<'static, Postgres>> {
    if criteria.is_empty() {
        return Err(StoreError::UnboundedWrite {
            op: "delete",
            table: schema.name().plain(),
        });
    }
    let mut builder = QueryBuilder::new(format!("DELETE FROM {} AS {ROW_ALIAS}", schema.name()));
    criteria.push_where(schema, &mut builder)?;
    Ok(builder)
}

fn select_records(schema: &TableSchema) -> QueryBuilder<'static, Postgres> {
    QueryBuilder::new(format!(
        "SELECT to_jsonb({ROW_ALIAS}) AS record FROM {} AS {ROW_ALIAS}",
        schema.name()
    ))
}

pub(crate) fn get_by_id_statement(
    schema: &TableSchema,
    id: &Value,
) -> StoreResult<QueryBuilder<'static, Postgres>> {
    let (ident, kind) = schema.column(schema.id_column().as_str())?;
    let id = SqlValue::convert(&schema.name().plain(), ident.as_str(), kind, id)?;
    let mut builder = select_records(schema);
    builder.push(format_args!(" WHERE {ROW_ALIAS}.{ident} = "));
    push_value(&mut builder, id);
    Ok(builder)
}

pub(crate) fn filtered_statement(
    schema: &TableSchema,
    criteria: &Criteria,
) -> StoreResult<QueryBuilder<'static, Postgres>> {
    let mut builder = select_records(schema);
    criteria.push_where(schema, &mut builder)?;
    Ok(builder)
}

pub(crate) fn similarity_statement(
    schema: &TableSchema,
    query: &SimilarityQuery,
) -> StoreResult<QueryBuilder<'static, Postgres>> {
    let table = schema.name().plain();
    let (column, kind) = schema.column(&query.column)?;
    if kind != ColumnKind::Vector {
        return Err(StoreError::schema(
            table,
            format!("column '{}' is not a vector column", query.column),
        ));
    }
    if query.vector.is_empty() {
        return Err(StoreError::schema(table, "query vector is empty"));
    }

    let mut builder = QueryBuilder::new(format!(
        "SELECT to_jsonb({ROW_ALIAS}) AS record, ({ROW_ALIAS}.{column} {} ",
        query.metric.operator()
    ));
    builder.push_bind(pgvector::Vector::from(query.vector.clone()));
    builder.push(format_args!(
        ")::float8 AS distance FROM {} AS {ROW_ALIAS} WHERE {ROW_ALIAS}.{column} IS NOT NULL",
        schema.name()
    ));
    query.filter.push_terms(schema, &mut builder, " AND ")?;
    builder.push(" ORDER BY distance ASC LIMIT ");
    builder.push_bind(i64::from(query.k));
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ScalarType;
    use crate::similarity::DistanceMetric;
    use crate::value::record;
    use serde_json::json;

    fn personality() -> TableSchema {
        TableSchema::builder("personality")
            .id("id", ScalarType::Uuid)
            .text("name")
            .scalar("age", ScalarType::Integer)
            .array("tags", ScalarType::Text)
            .json("interests")
            .vector("embedding")
            .build()
            .unwrap()
    }

    fn fields(value: Value) -> Record {
        record(value).unwrap()
    }

    // QueryBuilder has no Debug impl, so unwrap_err is unavailable
    fn rejected(result: StoreResult<QueryBuilder<'static, Postgres>>) -> StoreError {
        match result {
            Ok(builder) => panic!("expected an error, built: {}", builder.sql()),
            Err(err) => err,
        }
    }

    #[test]
    fn insert_binds_every_field_and_returns_the_row() {
        let builder = insert_statement(
            &personality(),
            &fields(json!({"name": "Ana", "tags": ["a", "b"], "interests": {"golf": true}})),
        )
        .unwrap();
        // serde_json::Map keeps keys sorted
        assert_eq!(
            builder.sql(),
            "INSERT INTO \"personality\" AS t (\"interests\", \"name\", \"tags\") \
             VALUES ($1, $2, $3) RETURNING to_jsonb(t) AS record"
        );
    }

    #[test]
    fn insert_with_no_fields_uses_defaults() {
        let builder = insert_statement(&personality(), &Record::new()).unwrap();
        assert_eq!(
            builder.sql(),
            "INSERT INTO \"personality\" AS t DEFAULT VALUES RETURNING to_jsonb(t) AS record"
        );
    }

    #[test]
    fn null_fields_are_literals() {
        let builder =
            insert_statement(&personality(), &fields(json!({"age": null, "name": "Ana"}))).unwrap();
        assert!(builder.sql().contains("VALUES (NULL, $1)"), "{}", builder.sql());
    }

    #[test]
    fn undeclared_and_mistyped_fields_are_rejected() {
        let err = rejected(insert_statement(&personality(), &fields(json!({"nickname": "x"}))));
        assert!(matches!(err, StoreError::Schema { .. }));

        let err = rejected(insert_statement(&personality(), &fields(json!({"tags": "a"}))));
        assert!(err.to_string().contains("expected an array"), "{err}");
    }

    #[test]
    fn update_sets_fields_then_filters() {
        let builder = update_statement(
            &personality(),
            &fields(json!({"age": 40})),
            &Criteria::new().eq("name", "Ana"),
        )
        .unwrap();
        assert_eq!(
            builder.sql(),
            "UPDATE \"personality\" AS t SET \"age\" = $1 WHERE t.\"name\" = $2"
        );
    }

    #[test]
    fn unbounded_writes_are_refused() {
        let err = rejected(update_statement(
            &personality(),
            &fields(json!({"age": 1})),
            &Criteria::new(),
        ));
        assert!(matches!(err, StoreError::UnboundedWrite { op: "update", .. }));

        let err = rejected(delete_statement(&personality(), &Criteria::new()));
        assert!(matches!(err, StoreError::UnboundedWrite { op: "delete", .. }));
    }

    #[test]
    fn upsert_updates_non_key_columns() {
        let builder = upsert_statement(
            &personality(),
            &fields(json!({"name": "Ana", "age": 31})),
            &["name"],
        )
        .unwrap();
        assert_eq!(
            builder.sql(),
            "INSERT INTO \"personality\" AS t (\"age\", \"name\") VALUES ($1, $2) \
             ON CONFLICT (\"name\") DO UPDATE SET \"age\" = EXCLUDED.\"age\" \
             RETURNING to_jsonb(t.\"id\") AS id"
        );
    }

    #[test]
    fn upsert_with_only_keys_still_returns_existing_id() {
        let builder =
            upsert_statement(&personality(), &fields(json!({"name": "Ana"})), &["name"]).unwrap();
        assert!(
            builder
                .sql()
                .contains("DO UPDATE SET \"name\" = EXCLUDED.\"name\""),
            "{}",
            builder.sql()
        );
    }

    #[test]
    fn upsert_requires_declared_keys() {
        assert!(upsert_statement(&personality(), &fields(json!({"name": "A"})), &[]).is_err());
        assert!(
            upsert_statement(&personality(), &fields(json!({"name": "A"})), &["slug"]).is_err()
        );
    }

    #[test]
    fn get_by_id_converts_with_the_id_type() {
        let id = json!("5f0c7c3e-3b7a-4a52-9a1e-0c1d2e3f4a5b");
        let builder = get_by_id_statement(&personality(), &id).unwrap();
        assert_eq!(
            builder.sql(),
            "SELECT to_jsonb(t) AS record FROM \"personality\" AS t WHERE t.\"id\" = $1"
        );

        let err = rejected(get_by_id_statement(&personality(), &json!("not-a-uuid")));
        assert!(matches!(err, StoreError::Schema { .. }));
    }

    #[test]
    fn similarity_orders_by_distance_with_prefilter() {
        let query = SimilarityQuery::new("embedding", vec![0.1, 0.2, 0.3], 5)
            .metric(DistanceMetric::Cosine)
            .filter(Criteria::new().eq("tags", "a"));
        let builder = similarity_statement(&personality(), &query).unwrap();
        assert_eq!(
            builder.sql(),
            "SELECT to_jsonb(t) AS record, (t.\"embedding\" <=> $1)::float8 AS distance \
             FROM \"personality\" AS t WHERE t.\"embedding\" IS NOT NULL \
             AND t.\"tags\" @> $2 ORDER BY distance ASC LIMIT $3"
        );
    }

    #[test]
    fn similarity_rejects_non_vector_columns() {
        let query = SimilarityQuery::new("name", vec![0.1], 1);
        let err = rejected(similarity_statement(&personality(), &query));
        assert!(err.to_string().contains("not a vector column"));

        let query = SimilarityQuery::new("embedding", Vec::new(), 1);
        assert!(similarity_statement(&personality(), &query).is_err());
    }

    #[test]
    fn caller_statements_are_wrapped_for_records() {
        assert_eq!(
            wrap_returning("  SELECT * FROM ad WHERE id = $1; "),
            "WITH q AS (SELECT * FROM ad WHERE id = $1\n) SELECT to_jsonb(q) AS record FROM q"
        );
    }

    #[test]
    fn trailing_line_comment_stays_inside_the_wrapper() {
        let wrapped = wrap_returning("SELECT 1 AS n -- trailing note");
        assert_eq!(
            wrapped,
            "WITH q AS (SELECT 1 AS n -- trailing note\n) SELECT to_jsonb(q) AS record FROM q"
        );
        let last_line = wrapped.lines().last().unwrap();
        assert!(last_line.starts_with(") SELECT to_jsonb(q)"), "{wrapped}");
    }

    #[test]
    fn script_future_can_be_spawned() {
        // checked at compile time; the function is never called
        fn spawnable(
            mut tx: Transaction,
        ) -> impl std::future::Future<Output = StoreResult<()>> + Send + 'static {
            async move { tx.execute_script("SELECT 1; SELECT 2").await }
        }
        let _ = spawnable;
    }
}
