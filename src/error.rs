use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;

use crate::tx_outcome::TransactionError;

#[derive(Debug, Error)]
pub enum TxPoolError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    /// Transient contention reported by a non-SQLite connection primitive.
    #[error("Resource busy: {0}")]
    Busy(String),

    #[error("Connection pool has been shut down")]
    PoolShutdown,

    #[error("Failed to open connection: {0}")]
    OpenFailed(#[source] Box<TxPoolError>),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Query failed after {attempts} attempt(s): {source}")]
    QueryFailed {
        attempts: u32,
        #[source]
        source: Box<TxPoolError>,
    },

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl TxPoolError {
    /// True when the store reported momentary contention (`SQLITE_BUSY` / `SQLITE_LOCKED`).
    ///
    /// Wrapped errors are not unwrapped: a `QueryFailed` has already been through the
    /// retry budget and must not be retried again by an outer layer.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            TxPoolError::SqliteError(err) => is_sqlite_contention(err),
            TxPoolError::Busy(_) => true,
            _ => false,
        }
    }

    /// Walk `QueryFailed`/`OpenFailed` wrappers down to the error reported by the primitive.
    #[must_use]
    pub fn root_cause(&self) -> &TxPoolError {
        match self {
            TxPoolError::QueryFailed { source, .. } | TxPoolError::OpenFailed(source) => {
                source.root_cause()
            }
            other => other,
        }
    }
}

/// `SQLITE_BUSY_SNAPSHOT` is excluded: the transaction's read snapshot is stale, so
/// re-issuing the same statement inside it can never succeed.
#[cfg(feature = "sqlite")]
fn is_sqlite_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    match err {
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                extended_code,
            },
            _,
        ) => *extended_code != ffi::SQLITE_BUSY_SNAPSHOT,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_variant_is_transient() {
        assert!(TxPoolError::Busy("locked".into()).is_busy());
        assert!(!TxPoolError::ExecutionError("syntax".into()).is_busy());
        assert!(!TxPoolError::PoolShutdown.is_busy());
    }

    #[test]
    fn query_failed_is_not_retried_again() {
        let err = TxPoolError::QueryFailed {
            attempts: 8,
            source: Box::new(TxPoolError::Busy("locked".into())),
        };
        assert!(!err.is_busy());
        assert!(err.root_cause().is_busy());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_busy_and_locked_are_transient() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy,
                extended_code: rusqlite::ffi::SQLITE_BUSY,
            },
            None,
        );
        let locked = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseLocked,
                extended_code: rusqlite::ffi::SQLITE_LOCKED,
            },
            None,
        );
        let stale_snapshot = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy,
                extended_code: rusqlite::ffi::SQLITE_BUSY_SNAPSHOT,
            },
            None,
        );
        assert!(TxPoolError::from(busy).is_busy());
        assert!(!TxPoolError::from(stale_snapshot).is_busy());
        assert!(TxPoolError::from(locked).is_busy());
        assert!(!TxPoolError::from(rusqlite::Error::QueryReturnedNoRows).is_busy());
    }
}
