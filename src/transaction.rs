use clap::ValueEnum;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::TxPoolError;
use crate::executor::{RetryPolicy, execute_with_retry};
use crate::manager::{AsyncDatabaseExecutor, ConnectionManager};
use crate::pool::{Lease, Pool};
use crate::results::ResultSet;
use crate::tx_outcome::TransactionError;
use crate::types::RowValues;

/// Locking mode requested when a transaction begins.
///
/// `Immediate` takes the write lock at `BEGIN`, so contention surfaces (and is retried)
/// before any work runs instead of at the first write.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize,
)]
pub enum TransactionBehavior {
    #[default]
    Deferred,
    Immediate,
    Exclusive,
}

impl TransactionBehavior {
    #[must_use]
    pub fn begin_statement(self) -> &'static str {
        match self {
            TransactionBehavior::Deferred => "BEGIN",
            TransactionBehavior::Immediate => "BEGIN IMMEDIATE",
            TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// The connection handed to a transaction body.
///
/// [`Tx::execute`] goes through the retrying executor with the pool's policy;
/// [`Tx::execute_once`] issues the statement exactly once.
pub struct Tx<'t, C> {
    conn: &'t mut C,
    retry: RetryPolicy,
}

impl<'t, C: AsyncDatabaseExecutor> Tx<'t, C> {
    /// Run a statement inside the transaction, retrying busy/locked failures.
    ///
    /// # Errors
    /// Returns `TxPoolError::QueryFailed` once the failure is non-transient or the retry
    /// budget is spent.
    pub async fn execute(
        &mut self,
        statement: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, TxPoolError> {
        execute_with_retry(&mut *self.conn, statement, params, &self.retry).await
    }

    /// Run a statement once, without retry.
    ///
    /// # Errors
    /// Propagates whatever the connection reports.
    pub async fn execute_once(
        &mut self,
        statement: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, TxPoolError> {
        self.conn.execute(statement, params).await
    }

    /// Raw access to the leased connection.
    pub fn connection(&mut self) -> &mut C {
        &mut *self.conn
    }
}

/// Run `body` inside `BEGIN` … `COMMIT` on one leased connection.
///
/// On a body error the transaction is rolled back. The connection goes back to the pool
/// exactly once on every path; when `ROLLBACK` or `COMMIT` fails the connection's session
/// state is unknown, so it is closed rather than reused.
///
/// ```rust,no_run
/// use sqlite_txpool::prelude::*;
///
/// # async fn demo(pool: Pool<SqliteManager>) -> Result<(), TxPoolError> {
/// let inserted = run_transaction(&pool, |mut tx| {
///     Box::pin(async move {
///         tx.execute("INSERT INTO t (name) VALUES (?1)", &[RowValues::Text("a".into())])
///             .await?;
///         let rows = tx.execute("SELECT count(*) AS n FROM t", &[]).await?;
///         Ok(rows.first().and_then(|r| r.get("n")).and_then(RowValues::as_int).copied())
///     })
/// })
/// .await?;
/// # let _ = inserted;
/// # Ok(()) }
/// ```
///
/// # Errors
/// A lease failure is returned as-is (`PoolShutdown`, `OpenFailed`). Any later failure is
/// `TxPoolError::Transaction` naming the phase that failed.
pub async fn run_transaction<M, T, F>(pool: &Pool<M>, body: F) -> Result<T, TxPoolError>
where
    M: ConnectionManager,
    T: Send,
    F: for<'t> FnOnce(Tx<'t, M::Connection>) -> BoxFuture<'t, Result<T, TxPoolError>> + Send,
{
    let _permit = pool.transaction_permit().await?;
    let mut lease = pool.lease().await?;
    // Until the transaction is settled, dropping this future must not put an open
    // transaction back into service.
    lease.mark_broken();
    let config = pool.config();
    let outcome = drive(&mut lease, config.transaction_behavior, config.retry, body).await;
    let reusable = matches!(
        outcome,
        Ok(_)
            | Err(TransactionError::Begin(_))
            | Err(TransactionError::Body { rollback: None, .. })
    );
    if reusable {
        lease.clear_broken();
    }
    pool.release(lease).await;
    outcome.map_err(TxPoolError::from)
}

async fn drive<M, T, F>(
    lease: &mut Lease<M>,
    behavior: TransactionBehavior,
    retry: RetryPolicy,
    body: F,
) -> Result<T, TransactionError>
where
    M: ConnectionManager,
    F: for<'t> FnOnce(Tx<'t, M::Connection>) -> BoxFuture<'t, Result<T, TxPoolError>>,
{
    let conn: &mut M::Connection = lease;

    let begin = behavior.begin_statement();
    if let Err(err) = execute_with_retry(&mut *conn, begin, &[], &retry).await {
        warn!(error = %err, "transaction failed to begin");
        return Err(TransactionError::begin(err));
    }

    let result = body(Tx {
        conn: &mut *conn,
        retry,
    })
    .await;

    match result {
        Ok(value) => match execute_with_retry(&mut *conn, "COMMIT", &[], &retry).await {
            Ok(_) => {
                debug!("transaction committed");
                Ok(value)
            }
            Err(err) => {
                warn!(error = %err, "transaction failed to commit");
                Err(TransactionError::commit(err))
            }
        },
        Err(err) => {
            let rollback = execute_with_retry(&mut *conn, "ROLLBACK", &[], &retry)
                .await
                .err();
            match &rollback {
                Some(rollback_err) => warn!(
                    error = %err,
                    rollback_error = %rollback_err,
                    "transaction body failed and rollback failed"
                ),
                None => debug!(error = %err, "transaction rolled back"),
            }
            Err(TransactionError::body(err, rollback))
        }
    }
}
