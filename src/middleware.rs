// Re-export hub so internal modules and downstream crates share one import path.

pub use crate::db::ConfigAndPool;
pub use crate::error::TxPoolError;
pub use crate::executor::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, RetryPolicy, execute_with_retry,
    execute_with_retry_cancellable,
};
pub use crate::manager::{AsyncDatabaseExecutor, ConnectionManager};
pub use crate::pool::{Lease, Pool, PoolConfig, PoolConfigBuilder, PoolStatus};
pub use crate::results::{CustomDbRow, ResultSet};
pub use crate::transaction::{TransactionBehavior, Tx, run_transaction};
pub use crate::tx_outcome::{TransactionError, TxDisposition};
pub use crate::types::RowValues;

#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteConnection, SqliteManager, SqliteOptions, SqliteOptionsBuilder};
