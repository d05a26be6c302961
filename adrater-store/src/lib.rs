//! adrater-store: PostgreSQL data access for adrater
//!
//! - [`Pool`]: bounded connection pool with an optional process-wide instance
//! - [`Transaction`]: one connection, committed or rolled back exactly once
//! - generic operations on [`Transaction`] driven by a declared [`TableSchema`]
//! - [`Migrator`]: ordered, idempotent, all-or-nothing schema migrations
//!
//! ```ignore
//! let descriptor = DbConfig::default().resolve()?;
//! let pool = Pool::open(&descriptor).await?;
//! Migrator::from_dir("migrations").run(&pool).await?;
//!
//! let ads = TableSchema::builder("ad").id("id", ScalarType::Uuid).text("copy").build()?;
//! let row = pool
//!     .transaction(|tx| Box::pin(async move {
//!         tx.insert(&ads, &record(json!({"copy": "Fresh coffee"}))?).await
//!     }))
//!     .await?;
//! ```

pub mod config;
pub mod criteria;
pub mod error;
pub mod ident;
pub mod migrate;
pub mod pool;
pub mod schema;
pub mod similarity;
pub mod transaction;
pub mod value;

pub use config::{ConnectionDescriptor, DbConfig, Endpoint};
pub use criteria::Criteria;
pub use error::{StoreError, StoreResult};
pub use ident::{Ident, QualifiedName};
pub use migrate::{
    AppliedMigration, DirectorySource, MigrationOutcome, MigrationReport, MigrationScript,
    MigrationSource, Migrator, StaticSource,
};
pub use pool::{shared, Pool, PoolStatus, PooledConnection};
pub use schema::{ColumnKind, ScalarType, TableSchema};
pub use similarity::{DistanceMetric, ScoredRecord, SimilarityQuery};
pub use transaction::Transaction;
pub use value::{decode, record, Record, SqlValue};
