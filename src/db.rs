use std::fmt;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::TxPoolError;
use crate::executor::{execute_with_retry, execute_with_retry_cancellable};
use crate::manager::{AsyncDatabaseExecutor, ConnectionManager};
use crate::pool::{Pool, PoolConfig, PoolStatus};
use crate::results::ResultSet;
use crate::transaction::{Tx, run_transaction};
use crate::types::RowValues;

/// Configuration and connection pool for a database
///
/// The entry point most callers use: one-off statements, scoped access to a connection,
/// and transactions, all leasing from the same bounded pool. Cloning is cheap.
pub struct ConfigAndPool<M: ConnectionManager> {
    pool: Pool<M>,
}

impl<M: ConnectionManager> fmt::Debug for ConfigAndPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigAndPool").field("pool", &self.pool).finish()
    }
}

impl<M: ConnectionManager> Clone for ConfigAndPool<M> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<M: ConnectionManager> ConfigAndPool<M> {
    /// Wrap a new pool over `manager`. Nothing is opened yet.
    ///
    /// # Errors
    /// Returns `TxPoolError::ConfigError` if `config` fails validation.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self, TxPoolError> {
        Ok(Self {
            pool: Pool::new(manager, config)?,
        })
    }

    #[must_use]
    pub fn pool(&self) -> &Pool<M> {
        &self.pool
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        self.pool.config()
    }

    /// Open connections up to `min_connections`.
    ///
    /// # Errors
    /// Returns `TxPoolError::OpenFailed` if a connection cannot be opened.
    pub async fn warmup(&self) -> Result<(), TxPoolError> {
        self.pool.warmup().await
    }

    /// Run one statement on a pooled connection with the pool's retry policy.
    ///
    /// # Errors
    /// Lease errors (`PoolShutdown`, `OpenFailed`) or `QueryFailed`.
    pub async fn execute(
        &self,
        statement: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, TxPoolError> {
        let mut lease = self.pool.lease().await?;
        let result =
            execute_with_retry(&mut *lease, statement, params, &self.pool.config().retry).await;
        self.pool.release(lease).await;
        result
    }

    /// Like [`ConfigAndPool::execute`], abandoning the queue wait or backoff when `token`
    /// is cancelled.
    ///
    /// # Errors
    /// `TxPoolError::Cancelled`, or the errors of [`ConfigAndPool::execute`].
    pub async fn execute_with_cancel(
        &self,
        statement: &str,
        params: &[RowValues],
        token: &CancellationToken,
    ) -> Result<ResultSet, TxPoolError> {
        let mut lease = self.pool.lease_with_cancel(token).await?;
        let retry = self.pool.config().retry;
        let result =
            execute_with_retry_cancellable(&mut *lease, statement, params, &retry, token).await;
        self.pool.release(lease).await;
        result
    }

    /// Run several parameterless statements on one pooled connection.
    ///
    /// # Errors
    /// Lease errors, or whatever the connection reports for the batch.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), TxPoolError> {
        let mut lease = self.pool.lease().await?;
        let result = lease.execute_batch(sql).await;
        self.pool.release(lease).await;
        result
    }

    /// Lend a pooled connection to `func` and release it afterwards, whatever `func`
    /// returns.
    ///
    /// # Errors
    /// Lease errors, or the error returned by `func`.
    pub async fn with_connection<T, F>(&self, func: F) -> Result<T, TxPoolError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut M::Connection) -> BoxFuture<'c, Result<T, TxPoolError>> + Send,
    {
        let mut lease = self.pool.lease().await?;
        let result = func(&mut *lease).await;
        self.pool.release(lease).await;
        result
    }

    /// Run `body` as one transaction. See [`run_transaction`].
    ///
    /// # Errors
    /// Lease errors, or `TxPoolError::Transaction` naming the phase that failed.
    pub async fn with_transaction<T, F>(&self, body: F) -> Result<T, TxPoolError>
    where
        T: Send,
        F: for<'t> FnOnce(Tx<'t, M::Connection>) -> BoxFuture<'t, Result<T, TxPoolError>> + Send,
    {
        run_transaction(&self.pool, body).await
    }

    /// Physical connections currently counted against the ceiling.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.pool.connection_count()
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Shut the pool down. Idempotent.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockManager, create_result_set};

    fn facade(manager: &MockManager) -> ConfigAndPool<MockManager> {
        ConfigAndPool::new(manager.clone(), PoolConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn execute_returns_rows_and_releases() {
        let manager = MockManager::new();
        manager.respond_with(
            "SELECT",
            create_result_set(&["n"], vec![vec![RowValues::Int(3)]]),
        );
        let db = facade(&manager);

        let rows = db.execute("SELECT 3 AS n", &[]).await.unwrap();
        assert_eq!(rows.first().and_then(|r| r.get("n")), Some(&RowValues::Int(3)));
        assert_eq!(db.status().idle_connections, 1);
    }

    #[tokio::test]
    async fn with_connection_releases_on_error() {
        let manager = MockManager::new();
        let db = facade(&manager);

        let err = db
            .with_connection(|conn| {
                Box::pin(async move {
                    conn.execute("UPDATE t SET x = 1", &[]).await?;
                    Err::<(), _>(TxPoolError::Other("stop".into()))
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TxPoolError::Other(_)));
        assert_eq!(db.status().idle_connections, 1);
        assert_eq!(db.connection_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_execute_reports_cancellation() {
        let manager = MockManager::new();
        manager.busy_on("UPDATE", None);
        let db = facade(&manager);
        let token = CancellationToken::new();
        token.cancel();

        let err = db
            .execute_with_cancel("UPDATE t SET x = 1", &[], &token)
            .await
            .unwrap_err();
        assert!(matches!(err, TxPoolError::Cancelled));
        assert_eq!(db.status().idle_connections, 1);
    }
}
