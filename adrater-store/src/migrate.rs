//! Sequential, idempotent schema migrations
//!
//! Scripts are ordered by the leading number in their filename
//! (`1.ad.sql`, `2.personality.sql`, `10.seed.sql`); files without one run
//! last, by name. Applied filenames are recorded in a metadata table.
//!
//! A run happens in one transaction: advisory lock, metadata table creation,
//! applied-set read, every pending script and every metadata insert. Either
//! all pending scripts land or none do.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::ident::QualifiedName;
use crate::pool::Pool;
use crate::transaction::Transaction;

/// Default metadata table name
pub const DEFAULT_TABLE: &str = "migrations";

/// One migration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationScript {
    pub filename: String,
    #[serde(skip)]
    pub sql: String,
}

impl MigrationScript {
    pub fn new(filename: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            sql: sql.into(),
        }
    }

    /// Leading numeric prefix of the filename, if any.
    pub fn sequence(&self) -> Option<u64> {
        sequence_key(&self.filename)
    }
}

/// Where migration scripts come from.
#[async_trait]
pub trait MigrationSource: Send + Sync {
    /// Every script, in no particular order.
    async fn scripts(&self) -> StoreResult<Vec<MigrationScript>>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// `*.sql` files directly inside one directory (no recursion).
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl MigrationSource for DirectorySource {
    async fn scripts(&self) -> StoreResult<Vec<MigrationScript>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || read_scripts(&dir))
            .await
            .map_err(|err| StoreError::MigrationSource {
                path: self.dir.clone(),
                source: std::io::Error::other(err),
            })?
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

fn read_scripts(dir: &Path) -> StoreResult<Vec<MigrationScript>> {
    let source_error = |path: &Path, source: std::io::Error| StoreError::MigrationSource {
        path: path.to_path_buf(),
        source,
    };

    let mut scripts = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|err| source_error(dir, err.into()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("sql") {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
            warn!(path = %path.display(), "skipping migration with non-UTF-8 name");
            continue;
        };
        let sql = std::fs::read_to_string(path).map_err(|err| source_error(path, err))?;
        scripts.push(MigrationScript::new(filename, sql));
    }
    debug!(dir = %dir.display(), count = scripts.len(), "discovered migration files");
    Ok(scripts)
}

/// In-memory scripts, for embedding in a binary and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    scripts: Vec<MigrationScript>,
}

impl StaticSource {
    pub fn new<I, F, S>(scripts: I) -> Self
    where
        I: IntoIterator<Item = (F, S)>,
        F: Into<String>,
        S: Into<String>,
    {
        Self {
            scripts: scripts
                .into_iter()
                .map(|(filename, sql)| MigrationScript::new(filename, sql))
                .collect(),
        }
    }
}

#[async_trait]
impl MigrationSource for StaticSource {
    async fn scripts(&self) -> StoreResult<Vec<MigrationScript>> {
        Ok(self.scripts.clone())
    }

    fn describe(&self) -> String {
        format!("{} embedded scripts", self.scripts.len())
    }
}

/// Leading digits of `filename` as a number.
pub fn sequence_key(filename: &str) -> Option<u64> {
    let end = filename
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(filename.len());
    filename[..end].parse().ok()
}

/// Application order: numbered ascending, then unnumbered; ties by filename.
pub fn plan(mut scripts: Vec<MigrationScript>) -> Vec<MigrationScript> {
    scripts.sort_by(|a, b| {
        let key = |s: &MigrationScript| {
            let seq = s.sequence();
            (seq.is_none(), seq.unwrap_or(0))
        };
        key(a)
            .cmp(&key(b))
            .then_with(|| a.filename.cmp(&b.filename))
    });
    scripts
}

/// Result of [`Migrator::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// The source held no scripts at all
    NoMigrationFiles,
    Completed(MigrationReport),
}

impl MigrationOutcome {
    /// Filenames applied by this run (empty when nothing was pending).
    pub fn applied(&self) -> &[String] {
        match self {
            MigrationOutcome::NoMigrationFiles => &[],
            MigrationOutcome::Completed(report) => &report.applied,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub discovered: usize,
    /// Newly applied, in application order
    pub applied: Vec<String>,
    /// Already applied by an earlier run
    pub skipped: usize,
}

/// A row of the metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct AppliedMigration {
    pub filename: String,
    pub applied_at: DateTime<Utc>,
}

/// Applies scripts from a [`MigrationSource`] and records them.
pub struct Migrator {
    source: Box<dyn MigrationSource>,
    table: QualifiedName,
    lock_key: i64,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("source", &self.source.describe())
            .field("table", &self.table.plain())
            .finish()
    }
}

impl Migrator {
    pub fn new(source: impl MigrationSource + 'static) -> Self {
        let table = QualifiedName::parse(DEFAULT_TABLE).expect("default table name is valid");
        Self {
            lock_key: lock_key(&table),
            source: Box::new(source),
            table,
        }
    }

    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(DirectorySource::new(dir))
    }

    /// Record migrations in `table` instead of `migrations`.
    pub fn with_table(mut self, table: &str) -> StoreResult<Self> {
        self.table = QualifiedName::parse(table)?;
        self.lock_key = lock_key(&self.table);
        Ok(self)
    }

    pub fn table(&self) -> &QualifiedName {
        &self.table
    }

    /// Scripts in application order, without touching the database.
    pub async fn plan(&self) -> StoreResult<Vec<MigrationScript>> {
        Ok(plan(self.source.scripts().await?))
    }

    /// Apply every pending script in one transaction.
    ///
    /// # Errors
    ///
    /// `Migration` naming the failing file; nothing from this run is kept.
    pub async fn run(&self, pool: &Pool) -> StoreResult<MigrationOutcome> {
        let scripts = self.plan().await?;
        if scripts.is_empty() {
            info!(source = %self.source.describe(), "no migration files found");
            return Ok(MigrationOutcome::NoMigrationFiles);
        }

        let mut tx = pool.begin().await?;
        match self.apply(&mut tx, &scripts).await {
            Ok(report) => {
                tx.commit().await?;
                info!(
                    applied = report.applied.len(),
                    skipped = report.skipped,
                    "migrations complete"
                );
                Ok(MigrationOutcome::Completed(report))
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed migration also failed");
                }
                warn!(error = %err, "migration run rolled back");
                Err(err)
            }
        }
    }

    async fn apply(
        &self,
        tx: &mut Transaction,
        scripts: &[MigrationScript],
    ) -> StoreResult<MigrationReport> {
        let table = self.table.plain();

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(self.lock_key)
            .execute(tx.connection())
            .await
            .map_err(|err| StoreError::query("lock", table.clone(), err))?;

        sqlx::query(&create_table_sql(&self.table))
            .execute(tx.connection())
            .await
            .map_err(|err| StoreError::query("create", table.clone(), err))?;

        let done: HashSet<String> =
            sqlx::query_scalar::<_, String>(&format!("SELECT filename FROM {}", self.table))
                .fetch_all(tx.connection())
                .await
                .map_err(|err| StoreError::query("select", table.clone(), err))?
                .into_iter()
                .collect();

        let record_sql = format!("INSERT INTO {} (filename) VALUES ($1)", self.table);
        let mut applied = Vec::new();
        for script in scripts {
            if done.contains(&script.filename) {
                debug!(filename = %script.filename, "already applied");
                continue;
            }
            info!(filename = %script.filename, "applying migration");
            tx.execute_script(&script.sql)
                .await
                .map_err(|err| StoreError::migration(&script.filename, err))?;
            sqlx::query(&record_sql)
                .bind(&script.filename)
                .execute(tx.connection())
                .await
                .map_err(|err| {
                    StoreError::migration(&script.filename, StoreError::query("record", table.clone(), err))
                })?;
            applied.push(script.filename.clone());
        }

        Ok(MigrationReport {
            discovered: scripts.len(),
            skipped: scripts.len() - applied.len(),
            applied,
        })
    }

    /// Recorded migrations in application order; empty if the table is missing.
    pub async fn applied(&self, pool: &Pool) -> StoreResult<Vec<AppliedMigration>> {
        let table = self.table.plain();
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(self.table.to_string())
            .fetch_one(pool.pg_pool())
            .await
            .map_err(|err| StoreError::query("select", table.clone(), err))?;
        if !exists {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, AppliedMigration>(&format!(
            "SELECT filename, applied_at FROM {} ORDER BY id",
            self.table
        ))
        .fetch_all(pool.pg_pool())
        .await
        .map_err(|err| StoreError::query("select", table, err))
    }

    /// Scripts not yet recorded, in application order.
    pub async fn pending(&self, pool: &Pool) -> StoreResult<Vec<MigrationScript>> {
        let done: HashSet<String> = self
            .applied(pool)
            .await?
            .into_iter()
            .map(|m| m.filename)
            .collect();
        Ok(self
            .plan()
            .await?
            .into_iter()
            .filter(|script| !done.contains(&script.filename))
            .collect())
    }
}

fn create_table_sql(table: &QualifiedName) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         id SERIAL PRIMARY KEY, \
         filename VARCHAR(255) NOT NULL UNIQUE, \
         applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW())"
    )
}

/// Advisory lock key for a metadata table (FNV-1a over its name).
fn lock_key(table: &QualifiedName) -> i64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in format!("adrater.migrate:{}", table.plain()).bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(scripts: &[MigrationScript]) -> Vec<&str> {
        scripts.iter().map(|s| s.filename.as_str()).collect()
    }

    fn script(name: &str) -> MigrationScript {
        MigrationScript::new(name, "")
    }

    #[test]
    fn test_sequence_key() {
        assert_eq!(sequence_key("1.ad.sql"), Some(1));
        assert_eq!(sequence_key("0010_seed.sql"), Some(10));
        assert_eq!(sequence_key("seed.sql"), None);
        assert_eq!(sequence_key(""), None);
    }

    #[test]
    fn plan_orders_numerically_not_lexically() {
        let ordered = plan(vec![
            script("2.add_index.sql"),
            script("1.create_table.sql"),
            script("10.seed.sql"),
        ]);
        assert_eq!(
            names(&ordered),
            ["1.create_table.sql", "2.add_index.sql", "10.seed.sql"]
        );
    }

    #[test]
    fn unnumbered_files_run_last_by_name() {
        let ordered = plan(vec![
            script("zz_cleanup.sql"),
            script("3.rating.sql"),
            script("extra.sql"),
            script("1.ad.sql"),
        ]);
        assert_eq!(
            names(&ordered),
            ["1.ad.sql", "3.rating.sql", "extra.sql", "zz_cleanup.sql"]
        );
    }

    #[test]
    fn equal_prefixes_break_ties_by_name() {
        let ordered = plan(vec![script("1.b.sql"), script("01.a.sql"), script("1.a.sql")]);
        assert_eq!(names(&ordered), ["01.a.sql", "1.a.sql", "1.b.sql"]);
    }

    #[test]
    fn lock_key_depends_on_table() {
        let a = QualifiedName::parse("migrations").unwrap();
        let b = QualifiedName::parse("migrations_test").unwrap();
        assert_eq!(lock_key(&a), lock_key(&a));
        assert_ne!(lock_key(&a), lock_key(&b));
    }

    #[test]
    fn metadata_table_ddl() {
        let sql = create_table_sql(&QualifiedName::parse("migrations").unwrap());
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"migrations\" ("));
        assert!(sql.contains("filename VARCHAR(255) NOT NULL UNIQUE"));
    }

    #[test]
    fn with_table_validates_name() {
        assert!(Migrator::new(StaticSource::default()).with_table("bad name").is_err());
        let migrator = Migrator::new(StaticSource::default())
            .with_table("app.schema_migrations")
            .unwrap();
        assert_eq!(migrator.table().plain(), "app.schema_migrations");
    }

    #[tokio::test]
    async fn directory_source_reads_only_top_level_sql() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("2.b.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("1.a.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("README.md"), "notes").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/3.c.sql"), "SELECT 3;").unwrap();

        let migrator = Migrator::from_dir(dir.path());
        let planned = migrator.plan().await.unwrap();
        assert_eq!(names(&planned), ["1.a.sql", "2.b.sql"]);
        assert_eq!(planned[0].sql, "SELECT 1;");
    }

    #[tokio::test]
    async fn bundled_schema_plans_in_dependency_order() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../migrations");
        let planned = Migrator::from_dir(dir).plan().await.unwrap();
        assert_eq!(
            names(&planned),
            [
                "1.ad.sql",
                "2.personality.sql",
                "3.rating.sql",
                "4.category.sql",
                "5.category_assignment.sql"
            ]
        );
    }

    #[tokio::test]
    async fn missing_directory_is_a_source_error() {
        let dir = TempDir::new().unwrap();
        let source = DirectorySource::new(dir.path().join("absent"));
        let err = source.scripts().await.unwrap_err();
        assert!(matches!(err, StoreError::MigrationSource { .. }));
    }

    #[tokio::test]
    async fn empty_directory_plans_nothing() {
        let dir = TempDir::new().unwrap();
        let planned = Migrator::from_dir(dir.path()).plan().await.unwrap();
        assert!(planned.is_empty());
    }

    #[test]
    fn run_future_can_be_spawned() {
        // checked at compile time; the function is never called
        fn spawnable(
            migrator: Migrator,
            pool: Pool,
        ) -> impl std::future::Future<Output = StoreResult<MigrationOutcome>> + Send + 'static
        {
            async move { migrator.run(&pool).await }
        }
        let _ = spawnable;
    }

    #[test]
    fn outcome_exposes_applied_names() {
        assert!(MigrationOutcome::NoMigrationFiles.applied().is_empty());
        let outcome = MigrationOutcome::Completed(MigrationReport {
            discovered: 2,
            applied: vec!["2.b.sql".to_string()],
            skipped: 1,
        });
        assert_eq!(outcome.applied(), ["2.b.sql".to_string()]);
    }
}
