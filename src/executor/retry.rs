use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::policy::RetryPolicy;
use crate::error::TxPoolError;
use crate::manager::AsyncDatabaseExecutor;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Execute `statement` on a leased connection, retrying busy/locked failures with backoff.
///
/// The same statement and parameters are re-issued on every attempt, so the statement must
/// be safe to repeat.
///
/// # Errors
/// Returns [`TxPoolError::QueryFailed`] when the failure is not transient or when
/// `policy.max_attempts` attempts all reported contention.
pub async fn execute_with_retry<C>(
    conn: &mut C,
    statement: &str,
    params: &[RowValues],
    policy: &RetryPolicy,
) -> Result<ResultSet, TxPoolError>
where
    C: AsyncDatabaseExecutor + ?Sized,
{
    run(conn, statement, params, policy, None).await
}

/// Like [`execute_with_retry`], but a cancelled `token` aborts any pending backoff.
///
/// # Errors
/// Returns [`TxPoolError::Cancelled`] if `token` fires while waiting to retry, otherwise the
/// same errors as [`execute_with_retry`].
pub async fn execute_with_retry_cancellable<C>(
    conn: &mut C,
    statement: &str,
    params: &[RowValues],
    policy: &RetryPolicy,
    token: &CancellationToken,
) -> Result<ResultSet, TxPoolError>
where
    C: AsyncDatabaseExecutor + ?Sized,
{
    run(conn, statement, params, policy, Some(token)).await
}

async fn run<C>(
    conn: &mut C,
    statement: &str,
    params: &[RowValues],
    policy: &RetryPolicy,
    token: Option<&CancellationToken>,
) -> Result<ResultSet, TxPoolError>
where
    C: AsyncDatabaseExecutor + ?Sized,
{
    let mut attempt: u32 = 1;
    loop {
        match conn.execute(statement, params).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt, statement, "statement succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if err.is_busy() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    statement,
                    error = %err,
                    "store busy; backing off"
                );
                match token {
                    Some(token) => {
                        tokio::select! {
                            () = token.cancelled() => return Err(TxPoolError::Cancelled),
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
                attempt += 1;
            }
            Err(err) => {
                return Err(TxPoolError::QueryFailed {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
        }
    }
}
