//! Structured-value conversion
//!
//! Converts JSON field values into typed bound parameters according to the
//! declared [`ColumnKind`], and binds them onto sqlx queries.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo, Postgres};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Encode, QueryBuilder, Type};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::schema::{ColumnKind, ScalarType};

/// Flat mapping from column name to value; the shape every record takes.
pub type Record = serde_json::Map<String, Value>;

/// Typed bound-parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Json(Value),
    BoolArray(Vec<bool>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    TextArray(Vec<String>),
    UuidArray(Vec<Uuid>),
    TimestampArray(Vec<DateTime<Utc>>),
    Vector(Vec<f32>),
}

impl SqlValue {
    /// Convert a JSON value for `column` of `table` using its declared kind.
    ///
    /// JSON `null` always becomes SQL `NULL`, whatever the kind.
    pub fn convert(table: &str, column: &str, kind: ColumnKind, value: &Value) -> StoreResult<Self> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        let result = match kind {
            ColumnKind::Scalar(ty) => scalar(ty, value),
            ColumnKind::Json => Ok(SqlValue::Json(value.clone())),
            ColumnKind::Array(ty) => match value {
                Value::Array(items) => array(ty, items),
                _ => Err(format!("expected an array, got {}", type_name(value))),
            },
            ColumnKind::Vector => vector(value).map(SqlValue::Vector),
        };
        result.map_err(|reason| StoreError::schema(table, format!("column '{column}': {reason}")))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

fn scalar(ty: ScalarType, value: &Value) -> Result<SqlValue, String> {
    let mismatch = || format!("expected {ty:?}, got {}", type_name(value));
    match ty {
        ScalarType::Text => value
            .as_str()
            .map(|s| SqlValue::Text(s.to_owned()))
            .ok_or_else(mismatch),
        ScalarType::Integer => value.as_i64().map(SqlValue::Int).ok_or_else(mismatch),
        ScalarType::Real => value.as_f64().map(SqlValue::Float).ok_or_else(mismatch),
        ScalarType::Boolean => value.as_bool().map(SqlValue::Bool).ok_or_else(mismatch),
        ScalarType::Uuid => {
            let raw = value.as_str().ok_or_else(mismatch)?;
            Uuid::parse_str(raw)
                .map(SqlValue::Uuid)
                .map_err(|err| format!("invalid uuid '{raw}': {err}"))
        }
        ScalarType::Timestamp => {
            let raw = value.as_str().ok_or_else(mismatch)?;
            parse_timestamp(raw).map(SqlValue::Timestamp)
        }
    }
}

fn array(ty: ScalarType, items: &[Value]) -> Result<SqlValue, String> {
    let converted = items
        .iter()
        .map(|item| {
            if item.is_null() {
                Err("array elements cannot be null".to_string())
            } else {
                scalar(ty, item)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    macro_rules! collect {
        ($variant:ident, $array:ident) => {
            SqlValue::$array(
                converted
                    .into_iter()
                    .filter_map(|v| match v {
                        SqlValue::$variant(inner) => Some(inner),
                        _ => None,
                    })
                    .collect(),
            )
        };
    }

    Ok(match ty {
        ScalarType::Text => collect!(Text, TextArray),
        ScalarType::Integer => collect!(Int, IntArray),
        ScalarType::Real => collect!(Float, FloatArray),
        ScalarType::Boolean => collect!(Bool, BoolArray),
        ScalarType::Uuid => collect!(Uuid, UuidArray),
        ScalarType::Timestamp => collect!(Timestamp, TimestampArray),
    })
}

/// Accepts a JSON number array, or the `"[1,2,3]"` text form Postgres
/// renders for vector columns inside `to_jsonb`.
fn vector(value: &Value) -> Result<Vec<f32>, String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| format!("vector element must be a number, got {}", type_name(item)))
            })
            .collect(),
        Value::String(raw) => {
            let inner = raw
                .trim()
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .ok_or_else(|| format!("invalid vector literal '{raw}'"))?;
            if inner.trim().is_empty() {
                return Ok(Vec::new());
            }
            inner
                .split(',')
                .map(|part| {
                    part.trim()
                        .parse::<f32>()
                        .map_err(|_| format!("invalid vector element '{}'", part.trim()))
                })
                .collect()
        }
        other => Err(format!("expected a vector, got {}", type_name(other))),
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f %z"))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| format!("invalid timestamp '{value}': {err}"))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Append `value` as a bound placeholder. `NULL` is written as a literal so
/// Postgres infers the column type instead of receiving a typed text null.
pub(crate) fn push_value(builder: &mut QueryBuilder<'static, Postgres>, value: SqlValue) {
    match value {
        SqlValue::Null => {
            builder.push("NULL");
        }
        SqlValue::Bool(v) => {
            builder.push_bind(v);
        }
        SqlValue::Int(v) => {
            builder.push_bind(v);
        }
        SqlValue::Float(v) => {
            builder.push_bind(v);
        }
        SqlValue::Text(v) => {
            builder.push_bind(v);
        }
        SqlValue::Uuid(v) => {
            builder.push_bind(v);
        }
        SqlValue::Timestamp(v) => {
            builder.push_bind(v);
        }
        SqlValue::Json(v) => {
            builder.push_bind(Json(v));
        }
        SqlValue::BoolArray(v) => {
            builder.push_bind(v);
        }
        SqlValue::IntArray(v) => {
            builder.push_bind(v);
        }
        SqlValue::FloatArray(v) => {
            builder.push_bind(v);
        }
        SqlValue::TextArray(v) => {
            builder.push_bind(v);
        }
        SqlValue::UuidArray(v) => {
            builder.push_bind(v);
        }
        SqlValue::TimestampArray(v) => {
            builder.push_bind(v);
        }
        SqlValue::Vector(v) => {
            builder.push_bind(pgvector::Vector::from(v));
        }
    }
}

/// A NULL parameter sent with type oid 0, which leaves the type to the server.
#[derive(Debug, Clone, Copy)]
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// Bind `value` onto a caller-written statement with positional placeholders.
pub(crate) fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null => query.bind(UntypedNull),
        SqlValue::Bool(v) => query.bind(v),
        SqlValue::Int(v) => query.bind(v),
        SqlValue::Float(v) => query.bind(v),
        SqlValue::Text(v) => query.bind(v),
        SqlValue::Uuid(v) => query.bind(v),
        SqlValue::Timestamp(v) => query.bind(v),
        SqlValue::Json(v) => query.bind(Json(v)),
        SqlValue::BoolArray(v) => query.bind(v),
        SqlValue::IntArray(v) => query.bind(v),
        SqlValue::FloatArray(v) => query.bind(v),
        SqlValue::TextArray(v) => query.bind(v),
        SqlValue::UuidArray(v) => query.bind(v),
        SqlValue::TimestampArray(v) => query.bind(v),
        SqlValue::Vector(v) => query.bind(pgvector::Vector::from(v)),
    }
}

/// Turn a JSON object into a [`Record`].
pub fn record(value: Value) -> StoreResult<Record> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::schema(
            "record",
            format!("expected an object, got {}", type_name(&other)),
        )),
    }
}

/// Decode a [`Record`] into a typed entity.
pub fn decode<T: serde::de::DeserializeOwned>(record: Record) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(i64::from(v))
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<Vec<String>> for SqlValue {
    fn from(v: Vec<String>) -> Self {
        SqlValue::TextArray(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn convert(kind: ColumnKind, value: Value) -> StoreResult<SqlValue> {
        SqlValue::convert("personality", "col", kind, &value)
    }

    #[test]
    fn nested_values_go_to_json_columns() {
        let value = json!({"tone": "warm", "scores": [1, 2]});
        assert_eq!(
            convert(ColumnKind::Json, value.clone()).unwrap(),
            SqlValue::Json(value)
        );
        assert_eq!(
            convert(ColumnKind::Json, json!(["a", "b"])).unwrap(),
            SqlValue::Json(json!(["a", "b"]))
        );
    }

    #[test]
    fn array_columns_keep_order_and_duplicates() {
        assert_eq!(
            convert(ColumnKind::Array(ScalarType::Text), json!(["b", "a", "b"])).unwrap(),
            SqlValue::TextArray(vec!["b".into(), "a".into(), "b".into()])
        );
        assert_eq!(
            convert(ColumnKind::Array(ScalarType::Integer), json!([3, 1])).unwrap(),
            SqlValue::IntArray(vec![3, 1])
        );
        assert_eq!(
            convert(ColumnKind::Array(ScalarType::Text), json!([])).unwrap(),
            SqlValue::TextArray(vec![])
        );
    }

    #[test]
    fn array_columns_reject_scalars_and_null_elements() {
        assert!(convert(ColumnKind::Array(ScalarType::Text), json!("a")).is_err());
        let err = convert(ColumnKind::Array(ScalarType::Text), json!(["a", null])).unwrap_err();
        assert!(err.to_string().contains("cannot be null"));
        assert!(convert(ColumnKind::Array(ScalarType::Integer), json!(["1"])).is_err());
    }

    #[test]
    fn null_is_sql_null_for_every_kind() {
        for kind in [
            ColumnKind::Json,
            ColumnKind::Vector,
            ColumnKind::Array(ScalarType::Text),
            ColumnKind::Scalar(ScalarType::Uuid),
        ] {
            assert_eq!(convert(kind, Value::Null).unwrap(), SqlValue::Null);
        }
    }

    #[test]
    fn scalars_are_strict() {
        assert_eq!(
            convert(ColumnKind::Scalar(ScalarType::Integer), json!(42)).unwrap(),
            SqlValue::Int(42)
        );
        assert_eq!(
            convert(ColumnKind::Scalar(ScalarType::Real), json!(3)).unwrap(),
            SqlValue::Float(3.0)
        );
        let err = convert(ColumnKind::Scalar(ScalarType::Text), json!(42)).unwrap_err();
        assert!(err.to_string().contains("column 'col'"));
        assert!(convert(ColumnKind::Scalar(ScalarType::Integer), json!(1.5)).is_err());
        assert!(convert(ColumnKind::Scalar(ScalarType::Text), json!({"a": 1})).is_err());
    }

    #[test]
    fn uuid_and_timestamp_parse_from_strings() {
        let id = Uuid::new_v4();
        assert_eq!(
            convert(ColumnKind::Scalar(ScalarType::Uuid), json!(id.to_string())).unwrap(),
            SqlValue::Uuid(id)
        );
        assert!(convert(ColumnKind::Scalar(ScalarType::Uuid), json!("nope")).is_err());

        let ts = convert(
            ColumnKind::Scalar(ScalarType::Timestamp),
            json!("2025-03-01T12:30:00+00:00"),
        )
        .unwrap();
        match ts {
            SqlValue::Timestamp(dt) => assert_eq!(dt.to_rfc3339(), "2025-03-01T12:30:00+00:00"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn vectors_accept_arrays_and_pg_text_form() {
        assert_eq!(
            convert(ColumnKind::Vector, json!([1.0, 0.5, 0])).unwrap(),
            SqlValue::Vector(vec![1.0, 0.5, 0.0])
        );
        assert_eq!(
            convert(ColumnKind::Vector, json!("[1,0.5,0]")).unwrap(),
            SqlValue::Vector(vec![1.0, 0.5, 0.0])
        );
        assert!(convert(ColumnKind::Vector, json!(["x"])).is_err());
        assert!(convert(ColumnKind::Vector, json!("1,2")).is_err());
    }

    #[test]
    fn push_value_writes_null_literal() {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT ");
        push_value(&mut builder, SqlValue::Null);
        builder.push(", ");
        push_value(&mut builder, SqlValue::Text("x".into()));
        assert_eq!(builder.sql(), "SELECT NULL, $1");
    }

    #[test]
    fn null_parameters_leave_the_type_to_the_server() {
        assert_eq!(
            <UntypedNull as Type<Postgres>>::type_info().oid(),
            Some(Oid(0))
        );
        let mut buf = PgArgumentBuffer::default();
        assert!(matches!(UntypedNull.encode_by_ref(&mut buf), Ok(IsNull::Yes)));
    }

    #[test]
    fn record_and_decode() {
        #[derive(serde::Deserialize)]
        struct Category {
            name: String,
            description: Option<String>,
        }

        let rec = record(json!({"name": "tech", "description": null})).unwrap();
        let category: Category = decode(rec).unwrap();
        assert_eq!(category.name, "tech");
        assert!(category.description.is_none());

        assert!(record(json!([1, 2])).is_err());
    }

    #[test]
    fn option_into_sql_value() {
        assert_eq!(SqlValue::from(None::<String>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".into()));
    }
}
