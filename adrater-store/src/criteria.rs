//! Typed WHERE clauses
//!
//! A [`Criteria`] is an ordered conjunction of `column <op> value` terms.
//! Column names are checked against the table schema and values are always
//! bound, so no caller text reaches the statement.

use serde_json::Value;
use sqlx::postgres::Postgres;
use sqlx::QueryBuilder;

use crate::error::{StoreError, StoreResult};
use crate::schema::{ColumnKind, TableSchema};
use crate::value::{push_value, Record, SqlValue};

/// Alias used for the target table in generated statements.
pub(crate) const ROW_ALIAS: &str = "t";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    terms: Vec<(String, Value)>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a term. Arrays mean "contains all of", `null` means `IS NULL`,
    /// anything else is equality.
    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.terms.push((column.to_owned(), value.into()));
        self
    }

    /// Every entry of the mapping becomes one term.
    pub fn from_record(record: &Record) -> Self {
        Self {
            terms: record
                .iter()
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Append ` WHERE ...` (nothing when empty).
    pub(crate) fn push_where(
        &self,
        schema: &TableSchema,
        builder: &mut QueryBuilder<'static, Postgres>,
    ) -> StoreResult<()> {
        self.push_terms(schema, builder, " WHERE ")
    }

    /// Append the terms, `prefix` first, joined with `AND`.
    pub(crate) fn push_terms(
        &self,
        schema: &TableSchema,
        builder: &mut QueryBuilder<'static, Postgres>,
        prefix: &str,
    ) -> StoreResult<()> {
        let table = schema.name().plain();
        for (i, (column, value)) in self.terms.iter().enumerate() {
            let (ident, kind) = schema.column(column)?;
            builder.push(if i == 0 { prefix } else { " AND " });
            builder.push(format_args!("{ROW_ALIAS}.{ident}"));

            if value.is_null() {
                builder.push(" IS NULL");
                continue;
            }

            match kind {
                ColumnKind::Vector => {
                    return Err(StoreError::schema(
                        table,
                        format!("vector column '{column}' cannot be used as a filter"),
                    ));
                }
                ColumnKind::Array(_) => {
                    let elements = match value {
                        Value::Array(_) => value.clone(),
                        scalar => Value::Array(vec![scalar.clone()]),
                    };
                    builder.push(" @> ");
                    push_value(builder, SqlValue::convert(&table, column, kind, &elements)?);
                }
                ColumnKind::Json if value.is_array() || value.is_object() => {
                    builder.push(" @> ");
                    push_value(builder, SqlValue::Json(value.clone()));
                }
                _ => {
                    builder.push(" = ");
                    push_value(builder, SqlValue::convert(&table, column, kind, value)?);
                }
            }
        }
        Ok(())
    }
}
