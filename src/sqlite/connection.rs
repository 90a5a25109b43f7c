use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::params::Params;
use super::query::build_result_set;
use crate::error::TxPoolError;
use crate::manager::AsyncDatabaseExecutor;
use crate::results::ResultSet;
use crate::types::RowValues;

pub(crate) type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

/// One physical `SQLite` connection. Every call runs on Tokio's blocking pool.
pub struct SqliteConnection {
    conn: SharedSqliteConnection,
}

impl SqliteConnection {
    pub(crate) fn new(conn: rusqlite::Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `func` against the raw `rusqlite` connection on the blocking pool.
    ///
    /// # Errors
    /// Propagates the closure's error, or `ExecutionError` if the blocking task panicked.
    pub async fn with_connection<F, R>(&self, func: F) -> Result<R, TxPoolError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, TxPoolError> + Send + 'static,
        R: Send + 'static,
    {
        run_blocking(self.conn_handle(), func).await
    }

    /// True when no transaction is open on this connection.
    ///
    /// # Errors
    /// Returns `ExecutionError` if the blocking task panicked.
    pub async fn is_autocommit(&self) -> Result<bool, TxPoolError> {
        run_blocking(self.conn_handle(), |conn| Ok(conn.is_autocommit())).await
    }

    fn conn_handle(&self) -> SharedSqliteConnection {
        Arc::clone(&self.conn)
    }

    /// Close the underlying handle, surfacing any error `sqlite3_close` reports.
    pub(crate) async fn close(self) -> Result<(), TxPoolError> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| {
                TxPoolError::ConnectionError(
                    "sqlite connection still in use by a blocking task at close".into(),
                )
            })?
            .into_inner();
        tokio::task::spawn_blocking(move || conn.close().map_err(|(_, err)| TxPoolError::from(err)))
            .await
            .map_err(join_error)?
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection").finish_non_exhaustive()
    }
}

fn join_error(err: tokio::task::JoinError) -> TxPoolError {
    TxPoolError::ExecutionError(format!("sqlite spawn_blocking join error: {err}"))
}

pub(crate) async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R, TxPoolError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, TxPoolError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(join_error)?
}

/// Switch a freshly opened connection to WAL journaling.
///
/// # Errors
/// Returns `TxPoolError` if the PRAGMA cannot be executed.
pub(crate) fn apply_wal_pragmas(conn: &rusqlite::Connection) -> Result<(), TxPoolError> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    Ok(())
}

#[async_trait]
impl AsyncDatabaseExecutor for SqliteConnection {
    async fn execute(
        &mut self,
        statement: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, TxPoolError> {
        let sql = statement.to_owned();
        let params = Params::convert(params);
        run_blocking(self.conn_handle(), move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            if stmt.column_count() == 0 {
                let changed = stmt.execute(rusqlite::params_from_iter(params.as_values()))?;
                return Ok(ResultSet::affected(changed));
            }
            build_result_set(&mut stmt, params.as_values())
        })
        .await
    }

    /// Runs the batch atomically when no transaction is open; inside a transaction it
    /// joins the caller's transaction.
    async fn execute_batch(&mut self, sql: &str) -> Result<(), TxPoolError> {
        let sql = sql.to_owned();
        run_blocking(self.conn_handle(), move |conn| {
            if conn.is_autocommit() {
                let tx = conn.transaction()?;
                tx.execute_batch(&sql)?;
                tx.commit()?;
            } else {
                conn.execute_batch(&sql)?;
            }
            Ok(())
        })
        .await
    }
}
