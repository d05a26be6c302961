//! Database connection pool management
//!
//! Wraps a sqlx `PgPool` built from a [`ConnectionDescriptor`]:
//! - never more than `max_connections` live connections
//! - `min_connections` kept warm by the sqlx maintenance task
//! - idle connections are pinged before reuse; dead ones are replaced
//! - connections flagged broken by a caller are closed, not recycled

use std::ops::{Deref, DerefMut};

use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{PgPool, Postgres};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::ConnectionDescriptor;
use crate::error::{StoreError, StoreResult};
use crate::transaction::Transaction;

/// Bounded pool of backend connections. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Pool {
    inner: PgPool,
    descriptor: ConnectionDescriptor,
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: u32,
    pub in_use: u32,
    pub max: u32,
}

/// A connection checked out of the pool.
///
/// Returned to the pool on drop, or closed if marked broken.
pub struct PooledConnection {
    conn: PoolConnection<Postgres>,
    broken: bool,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    fn new(conn: PoolConnection<Postgres>) -> Self {
        Self {
            conn,
            broken: false,
        }
    }

    /// Flag the connection as unusable; it is closed instead of recycled.
    pub fn mark_broken(&mut self) {
        if !self.broken {
            self.broken = true;
            self.conn.close_on_drop();
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub(crate) fn into_inner(self) -> PoolConnection<Postgres> {
        self.conn
    }
}

impl Deref for PooledConnection {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Pool {
    /// Open a pool and establish the first connection.
    ///
    /// # Errors
    ///
    /// `Configuration` if the descriptor cannot produce connect options,
    /// `Connection` if nothing connects within `connect_timeout`.
    pub async fn open(descriptor: &ConnectionDescriptor) -> StoreResult<Self> {
        let options = descriptor.connect_options()?;

        let inner = PgPoolOptions::new()
            .min_connections(descriptor.min_connections)
            .max_connections(descriptor.max_connections)
            .acquire_timeout(descriptor.connect_timeout)
            .test_before_acquire(true)
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        info!(
            target = %descriptor.label(),
            min = descriptor.min_connections,
            max = descriptor.max_connections,
            "connection pool opened"
        );

        Ok(Self {
            inner,
            descriptor: descriptor.clone(),
        })
    }

    /// Wrap an existing sqlx pool (tests, embedding in a host app).
    pub fn from_pg_pool(inner: PgPool, descriptor: ConnectionDescriptor) -> Self {
        Self { inner, descriptor }
    }

    /// Wait for a free connection, growing the pool up to `max_connections`.
    pub async fn acquire(&self) -> StoreResult<PooledConnection> {
        if self.inner.is_closed() {
            return Err(StoreError::PoolClosed);
        }
        let conn = self.inner.acquire().await.map_err(StoreError::from_sqlx)?;
        Ok(PooledConnection::new(conn))
    }

    /// Hand a connection back. Broken connections are closed here.
    pub async fn release(&self, conn: PooledConnection) {
        if conn.is_broken() {
            warn!("discarding broken connection");
            if let Err(err) = conn.into_inner().close().await {
                debug!(error = %err, "error closing broken connection");
            }
        } else {
            drop(conn);
        }
    }

    /// Acquire a connection and open a transaction on it.
    pub async fn begin(&self) -> StoreResult<Transaction> {
        if self.inner.is_closed() {
            return Err(StoreError::PoolClosed);
        }
        Transaction::begin(&self.inner).await
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// The connection is back in the pool before this returns, on every path.
    ///
    /// ```ignore
    /// let id = pool
    ///     .transaction(|tx| Box::pin(async move {
    ///         let row = tx.insert(&schema, &fields).await?;
    ///         Ok::<_, StoreError>(row["id"].clone())
    ///     }))
    ///     .await?;
    /// ```
    pub async fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, Result<T, E>>,
        E: From<StoreError>,
    {
        let mut tx = self.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed transaction scope also failed");
                }
                Err(err)
            }
        }
    }

    /// Drain and close every connection. Later acquires fail with `PoolClosed`.
    pub async fn close(&self) {
        self.inner.close().await;
        info!(target = %self.descriptor.label(), "connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn status(&self) -> PoolStatus {
        let size = self.inner.size();
        let idle = u32::try_from(self.inner.num_idle()).unwrap_or(size);
        PoolStatus {
            size,
            idle,
            in_use: size.saturating_sub(idle),
            max: self.descriptor.max_connections,
        }
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Underlying sqlx pool, for callers that need raw access.
    pub fn pg_pool(&self) -> &PgPool {
        &self.inner
    }
}

static SHARED: OnceCell<Pool> = OnceCell::const_new();

/// Process-wide pool, built on first call.
///
/// Concurrent first callers wait on a single construction. Later calls must
/// pass an equivalent descriptor. Prefer constructing a [`Pool`] at startup
/// and passing it down; this accessor exists for call sites that cannot.
pub async fn shared(descriptor: &ConnectionDescriptor) -> StoreResult<&'static Pool> {
    let pool = SHARED
        .get_or_try_init(|| async {
            debug!("initialising shared connection pool");
            Pool::open(descriptor).await
        })
        .await?;
    check_equivalent(pool.descriptor(), descriptor)?;
    Ok(pool)
}

fn check_equivalent(existing: &ConnectionDescriptor, requested: &ConnectionDescriptor) -> StoreResult<()> {
    if existing == requested {
        Ok(())
    } else {
        Err(StoreError::configuration(format!(
            "shared pool already open for {} with a different descriptor",
            existing.label()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Integration tests require a real database
    // Run with: DATABASE_URL=postgres://... cargo test -p adrater-store -- --ignored

    #[test]
    fn equivalent_descriptors_share() {
        let a = ConnectionDescriptor::from_url("postgres://localhost/adrater");
        let b = ConnectionDescriptor::from_url("postgres://localhost/adrater");
        assert!(check_equivalent(&a, &b).is_ok());

        let c = b.clone().with_pool_size(1, 2);
        let err = check_equivalent(&a, &c).unwrap_err();
        assert!(matches!(err, StoreError::Configuration { .. }));
    }

    #[tokio::test]
    async fn unreachable_backend_is_connection_error() {
        // port 1 on loopback refuses immediately
        let descriptor = ConnectionDescriptor::from_url("postgres://nobody@127.0.0.1:1/none")
            .with_connect_timeout(std::time::Duration::from_secs(2));
        let err = Pool::open(&descriptor).await.unwrap_err();
        assert!(err.is_connection_failure(), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn bad_url_is_configuration_error() {
        let descriptor = ConnectionDescriptor::from_url("not a url");
        let err = Pool::open(&descriptor).await.unwrap_err();
        assert!(matches!(err, StoreError::Configuration { .. }), "{err:?}");
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn pool_acquires_connection() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = Pool::open(&ConnectionDescriptor::from_url(url))
            .await
            .expect("pool creation failed");

        let mut conn = pool.acquire().await.expect("acquire failed");
        let one: (i32,) = sqlx::query_as("SELECT 1")
            .fetch_one(&mut *conn)
            .await
            .expect("query failed");
        assert_eq!(one.0, 1);
        pool.release(conn).await;
        pool.close().await;
    }
}
