//! Per-table column declarations
//!
//! Callers declare how each column is stored up front; values are converted
//! against the declaration instead of by inspecting their runtime shape.
//! The declaration doubles as the column allowlist for generated SQL.

use crate::error::{StoreError, StoreResult};
use crate::ident::{Ident, QualifiedName};

/// Scalar storage types understood by the value converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Text,
    /// Bound as `bigint`; array columns of this type should be `bigint[]`
    Integer,
    /// Bound as `double precision`
    Real,
    Boolean,
    Uuid,
    Timestamp,
}

/// How a column is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Single value of the given type
    Scalar(ScalarType),
    /// JSONB, holds any nested mapping/sequence
    Json,
    /// Native Postgres array (`text[]`, `bigint[]`, ...)
    Array(ScalarType),
    /// pgvector `vector(n)` embedding
    Vector,
}

/// Declared shape of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: QualifiedName,
    id_column: Ident,
    columns: Vec<(Ident, ColumnKind)>,
}

impl TableSchema {
    /// Start declaring a table. The id column defaults to `id` (text).
    pub fn builder(name: &str) -> TableSchemaBuilder {
        TableSchemaBuilder {
            name: name.to_owned(),
            id_column: ("id".to_owned(), ScalarType::Text),
            columns: Vec::new(),
        }
    }

    pub fn name(&self) -> &QualifiedName {
        &self.name
    }

    pub fn id_column(&self) -> &Ident {
        &self.id_column
    }

    pub fn columns(&self) -> impl Iterator<Item = (&Ident, ColumnKind)> {
        self.columns.iter().map(|(ident, kind)| (ident, *kind))
    }

    /// Look up a column, rejecting anything undeclared.
    pub fn column(&self, name: &str) -> StoreResult<(&Ident, ColumnKind)> {
        self.columns
            .iter()
            .find(|(ident, _)| ident.as_str() == name)
            .map(|(ident, kind)| (ident, *kind))
            .ok_or_else(|| {
                StoreError::schema(self.name.plain(), format!("unknown column '{name}'"))
            })
    }
}

/// Builder for [`TableSchema`]; validation happens in [`TableSchemaBuilder::build`].
#[derive(Debug, Clone)]
pub struct TableSchemaBuilder {
    name: String,
    id_column: (String, ScalarType),
    columns: Vec<(String, ColumnKind)>,
}

impl TableSchemaBuilder {
    /// Declare the identifier column and its type.
    pub fn id(mut self, name: &str, ty: ScalarType) -> Self {
        self.id_column = (name.to_owned(), ty);
        self
    }

    pub fn column(mut self, name: &str, kind: ColumnKind) -> Self {
        self.columns.push((name.to_owned(), kind));
        self
    }

    pub fn scalar(self, name: &str, ty: ScalarType) -> Self {
        self.column(name, ColumnKind::Scalar(ty))
    }

    pub fn text(self, name: &str) -> Self {
        self.scalar(name, ScalarType::Text)
    }

    pub fn json(self, name: &str) -> Self {
        self.column(name, ColumnKind::Json)
    }

    pub fn array(self, name: &str, ty: ScalarType) -> Self {
        self.column(name, ColumnKind::Array(ty))
    }

    pub fn vector(self, name: &str) -> Self {
        self.column(name, ColumnKind::Vector)
    }

    pub fn build(self) -> StoreResult<TableSchema> {
        let name = QualifiedName::parse(&self.name)?;
        let id_column = Ident::new(&self.id_column.0)?;

        let mut columns: Vec<(Ident, ColumnKind)> = Vec::with_capacity(self.columns.len() + 1);
        columns.push((id_column.clone(), ColumnKind::Scalar(self.id_column.1)));
        for (column, kind) in self.columns {
            let ident = Ident::new(&column)?;
            if columns.iter().any(|(existing, _)| *existing == ident) {
                return Err(StoreError::schema(
                    name.plain(),
                    format!("column '{column}' declared twice"),
                ));
            }
            columns.push((ident, kind));
        }

        Ok(TableSchema {
            name,
            id_column,
            columns,
        })
    }
}
