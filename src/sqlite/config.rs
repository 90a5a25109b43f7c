use std::time::Duration;

use super::manager::SqliteManager;
use crate::db::ConfigAndPool;
use crate::error::TxPoolError;
use crate::executor::RetryPolicy;
use crate::pool::PoolConfig;
use crate::transaction::TransactionBehavior;

/// Options for configuring a `SQLite` pool.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub db_path: String,
    /// Switch each new connection to WAL journaling.
    pub wal: bool,
    /// Driver-level busy wait. Zero hands every lock conflict to the retry policy.
    pub busy_timeout: Duration,
    pub pool: PoolConfig,
}

impl SqliteOptions {
    /// WAL on, no driver busy wait, and `BEGIN IMMEDIATE` for transactions.
    ///
    /// A deferred transaction that reads and then writes can hit `SQLITE_BUSY_SNAPSHOT`
    /// under WAL, which no retry can clear; taking the write lock at `BEGIN` avoids it.
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            db_path,
            wal: true,
            busy_timeout: Duration::ZERO,
            pool: PoolConfig {
                transaction_behavior: TransactionBehavior::Immediate,
                ..PoolConfig::default()
            },
        }
    }

    #[must_use]
    pub fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.opts.wal = wal;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.opts.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn pool_config(mut self, pool: PoolConfig) -> Self {
        self.opts.pool = pool;
        self
    }

    #[must_use]
    pub fn min_connections(mut self, min_connections: usize) -> Self {
        self.opts.pool.min_connections = min_connections;
        self
    }

    #[must_use]
    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.opts.pool.max_connections = max_connections;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.opts.pool.retry = retry;
        self
    }

    #[must_use]
    pub fn transaction_behavior(mut self, behavior: TransactionBehavior) -> Self {
        self.opts.pool.transaction_behavior = behavior;
        self
    }

    #[must_use]
    pub fn serialize_transactions(mut self, serialize: bool) -> Self {
        self.opts.pool.serialize_transactions = serialize;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Build a `ConfigAndPool` for `SQLite`.
    ///
    /// # Errors
    ///
    /// Returns `TxPoolError` if the pool config is invalid or the initial connection test
    /// fails.
    pub async fn build(self) -> Result<ConfigAndPool<SqliteManager>, TxPoolError> {
        ConfigAndPool::new_sqlite(self.finish()).await
    }
}

impl ConfigAndPool<SqliteManager> {
    #[must_use]
    pub fn sqlite_builder(db_path: String) -> SqliteOptionsBuilder {
        SqliteOptionsBuilder::new(db_path)
    }

    /// Build a `SQLite` pool, open one connection to check the path, then warm up to
    /// `min_connections`.
    ///
    /// # Errors
    /// Returns `TxPoolError::ConfigError` for an invalid pool config, or
    /// `TxPoolError::OpenFailed` if the database cannot be opened.
    pub async fn new_sqlite(opts: SqliteOptions) -> Result<Self, TxPoolError> {
        let manager = SqliteManager::from_options(&opts);
        let config_and_pool = ConfigAndPool::new(manager, opts.pool)?;
        {
            let lease = config_and_pool.pool().lease().await?;
            config_and_pool.pool().release(lease).await;
        }
        config_and_pool.warmup().await?;
        Ok(config_and_pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_carries_pool_settings() {
        let opts = ConfigAndPool::sqlite_builder("app.db".into())
            .max_connections(2)
            .busy_timeout(Duration::from_millis(10))
            .transaction_behavior(TransactionBehavior::Immediate)
            .finish();
        assert_eq!(opts.pool.max_connections, 2);
        assert_eq!(opts.busy_timeout, Duration::from_millis(10));
        assert_eq!(opts.pool.transaction_behavior, TransactionBehavior::Immediate);
        assert!(opts.wal);
    }

    #[test]
    fn transactions_begin_immediate_by_default() {
        let opts = ConfigAndPool::sqlite_builder("app.db".into()).finish();
        assert_eq!(opts.pool.transaction_behavior, TransactionBehavior::Immediate);
        assert_eq!(opts.busy_timeout, Duration::ZERO);
    }

    #[test]
    fn explicit_pool_config_replaces_defaults() {
        let pool = PoolConfig::builder()
            .max_connections(7)
            .transaction_behavior(TransactionBehavior::Exclusive)
            .build()
            .unwrap();
        let opts = SqliteOptions::new("app.db".into()).with_pool_config(pool);
        assert_eq!(opts.pool.max_connections, 7);
        assert_eq!(opts.pool.transaction_behavior, TransactionBehavior::Exclusive);
    }

    #[tokio::test]
    async fn invalid_pool_config_is_rejected() {
        let err = ConfigAndPool::sqlite_builder(":memory:".into())
            .max_connections(0)
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, TxPoolError::ConfigError(_)));
    }
}
