//! Shared helpers for database-backed tests
//!
//! Run with: DATABASE_URL=postgres://... cargo test -p adrater-store -- --ignored

#![allow(dead_code)]

use adrater_store::{ConnectionDescriptor, Pool};

pub fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL required")
}

pub fn descriptor(max_connections: u32) -> ConnectionDescriptor {
    ConnectionDescriptor::from_url(database_url()).with_pool_size(1, max_connections)
}

pub async fn open_pool(max_connections: u32) -> Pool {
    Pool::open(&descriptor(max_connections))
        .await
        .expect("pool creation failed")
}

/// Table name unique to one test run.
pub fn unique(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

pub async fn drop_table(pool: &Pool, table: &str) {
    let mut tx = pool.begin().await.expect("begin failed");
    tx.execute_script(&format!("DROP TABLE IF EXISTS \"{table}\""))
        .await
        .expect("drop failed");
    tx.commit().await.expect("commit failed");
}
