//! A bounded async connection pool and transaction runner for `SQLite`.
//!
//! Many concurrent callers share a small set of physical connections. Leases are handed
//! out LIFO from the idle stack and FIFO to queued waiters, busy/locked errors are retried
//! with capped exponential backoff, and [`run_transaction`] wraps caller work in
//! `BEGIN`/`COMMIT`/`ROLLBACK` with a [`TransactionError`] naming the phase that failed.
//!
//! ```rust,no_run
//! use sqlite_txpool::prelude::*;
//!
//! # async fn demo() -> Result<(), TxPoolError> {
//! let db = ConfigAndPool::sqlite_builder("app.db".to_string())
//!     .max_connections(4)
//!     .transaction_behavior(TransactionBehavior::Immediate)
//!     .build()
//!     .await?;
//! db.execute_batch("CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY, name TEXT)")
//!     .await?;
//! db.with_transaction(|mut tx| {
//!     Box::pin(async move {
//!         tx.execute("INSERT INTO t (name) VALUES (?1)", &[RowValues::Text("a".into())])
//!             .await?;
//!         Ok(())
//!     })
//! })
//! .await?;
//! db.shutdown().await;
//! # Ok(()) }
//! ```

pub mod db;
pub mod error;
pub mod executor;
pub mod manager;
pub mod middleware;
pub mod pool;
pub mod prelude;
pub mod results;
pub mod transaction;
pub mod tx_outcome;
pub mod types;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use middleware::{
    AsyncDatabaseExecutor, ConfigAndPool, ConnectionManager, CustomDbRow, Lease, Pool,
    PoolConfig, PoolConfigBuilder, PoolStatus, ResultSet, RetryPolicy, RowValues,
    TransactionBehavior, TransactionError, TxDisposition, Tx, TxPoolError, execute_with_retry,
    execute_with_retry_cancellable, run_transaction,
};

#[cfg(feature = "sqlite")]
pub use middleware::{SqliteConnection, SqliteManager, SqliteOptions, SqliteOptionsBuilder};
