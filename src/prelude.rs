//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::middleware::{
    AsyncDatabaseExecutor, ConfigAndPool, ConnectionManager, CustomDbRow, Lease, Pool,
    PoolConfig, ResultSet, RetryPolicy, RowValues, TransactionBehavior, TransactionError,
    TxDisposition, Tx, TxPoolError, execute_with_retry, run_transaction,
};

pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "sqlite")]
pub use crate::middleware::{SqliteConnection, SqliteManager, SqliteOptions, SqliteOptionsBuilder};
