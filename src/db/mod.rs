//! Database connection and per-request transactions

pub mod schema_sync;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::error::{ApiError, ApiResult};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new database connection pool.
    ///
    /// Every connection to `sqlite::memory:` opens its own empty database, so
    /// in-memory pools are pinned to a single long-lived connection.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {url}"))?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new();
        if in_memory {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            pool_options = pool_options.max_connections(max_connections);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        tracing::info!(url = %url, in_memory, "Connected to database");

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open the transaction one request runs in
    pub async fn begin(&self) -> Result<RequestTransaction, sqlx::Error> {
        let tx = self.pool.begin().await?;
        Ok(RequestTransaction {
            inner: Arc::new(Mutex::new(Some(tx))),
        })
    }
}

/// The transaction shared by every read and write of one request.
///
/// Field resolvers take turns on the connection through an async mutex; the
/// service finishes it with [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) once the response is known.
#[derive(Clone)]
pub struct RequestTransaction {
    inner: Arc<Mutex<Option<Transaction<'static, Sqlite>>>>,
}

impl RequestTransaction {
    /// Lock the connection for the duration of one action
    pub async fn lock(&self) -> ApiResult<MappedMutexGuard<'_, SqliteConnection>> {
        let guard = self.inner.lock().await;
        MutexGuard::try_map(guard, |tx| tx.as_mut().map(|tx| &mut **tx)).map_err(|_| {
            ApiError::Internal(anyhow::anyhow!("Request transaction is already finished"))
        })
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    pub async fn commit(&self) -> Result<(), sqlx::Error> {
        if let Some(tx) = self.inner.lock().await.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    pub async fn rollback(&self) -> Result<(), sqlx::Error> {
        if let Some(tx) = self.inner.lock().await.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
