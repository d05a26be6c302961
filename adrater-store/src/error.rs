/// Structured error types for adrater-store.
///
/// Uses `thiserror` so library consumers get composable errors.
/// The CLI wraps these in `anyhow` for reporting.
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for data-access operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection descriptor is incomplete or inconsistent
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Backend unreachable or pool exhausted past the acquire timeout
    #[error("Connection error: {source}")]
    Connection {
        #[source]
        source: sqlx::Error,
    },

    /// Pool was closed before the call
    #[error("Connection pool is closed")]
    PoolClosed,

    /// Insert failed and was rolled back
    #[error("Insert into {table} failed: {source}")]
    Insert {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    /// A migration script failed; the whole run was rolled back
    #[error("Migration {filename} failed: {source}")]
    Migration {
        filename: String,
        #[source]
        source: Box<StoreError>,
    },

    /// Migration scripts could not be read
    #[error("Cannot read migrations from {path:?}: {source}")]
    MigrationSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Statement failed on the backend
    #[error("{op} on {target} failed: {source}")]
    Query {
        op: &'static str,
        target: String,
        #[source]
        source: sqlx::Error,
    },

    /// Table or column name rejected by the identifier allowlist
    #[error("Invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    /// Value or column does not fit the declared table schema
    #[error("Schema violation on {table}: {reason}")]
    Schema { table: String, reason: String },

    /// Update or delete without any criteria
    #[error("Refusing {op} on {table} without criteria")]
    UnboundedWrite { op: &'static str, table: String },

    /// Record could not be decoded into the requested type
    #[error("Decode error: {source}")]
    Decode {
        #[from]
        source: serde_json::Error,
    },
}

/// Result type alias for data-access operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a schema violation error
    pub fn schema(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Create a query error for `op` against `target`
    pub fn query(op: &'static str, target: impl Into<String>, source: sqlx::Error) -> Self {
        match source {
            sqlx::Error::PoolClosed => Self::PoolClosed,
            source => Self::Query {
                op,
                target: target.into(),
                source,
            },
        }
    }

    /// Wrap a failure inside a migration script
    pub fn migration(filename: impl Into<String>, source: StoreError) -> Self {
        Self::Migration {
            filename: filename.into(),
            source: Box::new(source),
        }
    }

    /// Classify a sqlx error raised while acquiring or finishing a connection.
    pub fn from_sqlx(source: sqlx::Error) -> Self {
        match source {
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::Configuration(err) => Self::Configuration {
                reason: err.to_string(),
            },
            source @ (sqlx::Error::PoolTimedOut
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed) => Self::Connection { source },
            source => Self::Query {
                op: "statement",
                target: "connection".to_string(),
                source,
            },
        }
    }

    /// True for failures that leave the connection unusable.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::PoolClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::configuration("host is required");
        assert_eq!(err.to_string(), "Configuration error: host is required");

        let err = StoreError::UnboundedWrite {
            op: "delete",
            table: "\"ad\"".to_string(),
        };
        assert_eq!(err.to_string(), "Refusing delete on \"ad\" without criteria");
    }

    #[test]
    fn test_sqlx_classification() {
        assert!(matches!(
            StoreError::from_sqlx(sqlx::Error::PoolClosed),
            StoreError::PoolClosed
        ));
        assert!(matches!(
            StoreError::from_sqlx(sqlx::Error::PoolTimedOut),
            StoreError::Connection { .. }
        ));
        assert!(StoreError::from_sqlx(sqlx::Error::PoolTimedOut).is_connection_failure());
        assert!(matches!(
            StoreError::from_sqlx(sqlx::Error::RowNotFound),
            StoreError::Query { .. }
        ));
        assert!(matches!(
            StoreError::query("insert", "ad", sqlx::Error::PoolClosed),
            StoreError::PoolClosed
        ));
    }

    #[test]
    fn test_migration_error_carries_filename() {
        let inner = StoreError::query("script", "2.add_index.sql", sqlx::Error::RowNotFound);
        let err = StoreError::migration("2.add_index.sql", inner);
        assert!(err.to_string().starts_with("Migration 2.add_index.sql failed"));
        match err {
            StoreError::Migration { filename, .. } => assert_eq!(filename, "2.add_index.sql"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
