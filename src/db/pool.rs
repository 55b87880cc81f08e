//! Connection pool for the destination store.
use derive_builder::Builder;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use super::repository::FileTransaction;
use crate::config::{CONNECT_TIMEOUT, MAX_CONNECTIONS};
use crate::error::EtlError;

/// Inner pool variants
#[derive(Debug, Clone)]
enum PoolInner {
    Postgres(sqlx::PgPool),
    #[cfg(test)]
    Sqlite(sqlx::SqlitePool),
}

#[derive(Debug, Clone)]
pub struct Pool {
    inner: PoolInner,
}

#[derive(Builder)]
pub struct PoolArgs {
    #[builder(setter(into))]
    database_url: String,
    #[builder(default = "MAX_CONNECTIONS")]
    max_connections: u32,
    #[builder(default = "CONNECT_TIMEOUT")]
    connect_timeout: Duration,
}

/// Connect to Postgres. Any failure here is fatal for the run.
pub async fn pool(args: PoolArgs) -> Result<Pool, EtlError> {
    let PoolArgs {
        database_url,
        max_connections,
        connect_timeout,
    } = args;

    let connect_options =
        PgConnectOptions::from_str(&database_url).map_err(EtlError::Connection)?;

    info!(
        host = connect_options.get_host(),
        database = connect_options.get_database().unwrap_or_default(),
        "connecting to destination store"
    );

    let pg_pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(connect_timeout)
        .connect_with(connect_options)
        .await
        .map_err(EtlError::Connection)?;

    Ok(Pool {
        inner: PoolInner::Postgres(pg_pool),
    })
}

impl Pool {
    /// Create an in-memory SQLite pool for testing.
    ///
    /// A single connection, since every connection to `sqlite::memory:` would
    /// otherwise see its own empty database.
    #[cfg(test)]
    pub async fn sqlite_in_memory() -> Result<Self, sqlx::Error> {
        let sqlite_pool = sqlx::sqlite::SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Ok(Pool {
            inner: PoolInner::Sqlite(sqlite_pool),
        })
    }

    #[cfg(test)]
    pub fn sqlite(&self) -> &sqlx::SqlitePool {
        match &self.inner {
            PoolInner::Sqlite(pool) => pool,
            PoolInner::Postgres(_) => panic!("Not a SQLite pool"),
        }
    }

    /// Open the transaction that scopes one source file
    pub async fn begin(&self) -> Result<FileTransaction, sqlx::Error> {
        match &self.inner {
            PoolInner::Postgres(pool) => Ok(FileTransaction::Postgres(pool.begin().await?)),
            #[cfg(test)]
            PoolInner::Sqlite(pool) => Ok(FileTransaction::Sqlite(pool.begin().await?)),
        }
    }

    /// Execute a statement outside any file transaction (DDL, truncation)
    pub async fn execute_query(&self, sql: &str) -> Result<u64, sqlx::Error> {
        match &self.inner {
            PoolInner::Postgres(pool) => Ok(sqlx::query(sql).execute(pool).await?.rows_affected()),
            #[cfg(test)]
            PoolInner::Sqlite(pool) => Ok(sqlx::query(sql).execute(pool).await?.rows_affected()),
        }
    }

    /// Check if this pool is using PostgreSQL (returns false for SQLite)
    pub fn is_postgres(&self) -> bool {
        matches!(&self.inner, PoolInner::Postgres(_))
    }

    pub async fn close(&self) {
        match &self.inner {
            PoolInner::Postgres(pool) => pool.close().await,
            #[cfg(test)]
            PoolInner::Sqlite(pool) => pool.close().await,
        }
    }
}
