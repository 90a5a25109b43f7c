use async_trait::async_trait;

use crate::error::TxPoolError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Opens and closes the physical connections a [`Pool`](crate::pool::Pool) hands out.
///
/// Implementations must report transient contention as an error for which
/// [`TxPoolError::is_busy`] returns true (`SqliteError` with `SQLITE_BUSY`/`SQLITE_LOCKED`,
/// or [`TxPoolError::Busy`] for other stores) so the retrying executor can absorb it.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: AsyncDatabaseExecutor + Send + 'static;

    /// Establish one new physical connection.
    async fn connect(&self) -> Result<Self::Connection, TxPoolError>;

    /// Close a connection permanently. Failures are logged by the pool, never surfaced.
    async fn close(&self, conn: Self::Connection) -> Result<(), TxPoolError>;
}

#[async_trait]
pub trait AsyncDatabaseExecutor: Send {
    /// Execute one statement with positional parameters and return its rows.
    ///
    /// Statements that produce no columns return an empty [`ResultSet`] whose
    /// `rows_affected` carries the change count.
    async fn execute(
        &mut self,
        statement: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, TxPoolError>;

    /// Execute a batch of parameterless statements.
    async fn execute_batch(&mut self, sql: &str) -> Result<(), TxPoolError> {
        self.execute(sql, &[]).await.map(|_| ())
    }
}
