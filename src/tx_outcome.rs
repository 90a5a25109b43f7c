use std::fmt;

use crate::error::TxPoolError;

/// Which phase of a transaction failed, and whether the rollback that followed also failed.
///
/// The phases are mutually exclusive: a rollback error can only ever accompany a body
/// failure, because rollback is not attempted after a failed `BEGIN` or `COMMIT`.
#[derive(Debug)]
pub enum TransactionError {
    /// `BEGIN` failed; nothing was written.
    Begin(Box<TxPoolError>),
    /// The caller's body failed. `rollback` is set when the `ROLLBACK` issued afterwards
    /// failed too, leaving the outcome on the store unknown.
    Body {
        error: Box<TxPoolError>,
        rollback: Option<Box<TxPoolError>>,
    },
    /// `COMMIT` failed. The store may or may not have applied the work.
    Commit(Box<TxPoolError>),
}

/// What a caller can conclude about the data after a failed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxDisposition {
    /// Nothing from this transaction is visible.
    RolledBack,
    /// The work may have been partially or fully applied.
    Ambiguous,
}

impl TransactionError {
    pub(crate) fn begin(err: TxPoolError) -> Self {
        TransactionError::Begin(Box::new(err))
    }

    pub(crate) fn body(err: TxPoolError, rollback: Option<TxPoolError>) -> Self {
        TransactionError::Body {
            error: Box::new(err),
            rollback: rollback.map(Box::new),
        }
    }

    pub(crate) fn commit(err: TxPoolError) -> Self {
        TransactionError::Commit(Box::new(err))
    }

    #[must_use]
    pub fn begin_error(&self) -> Option<&TxPoolError> {
        match self {
            TransactionError::Begin(err) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn body_error(&self) -> Option<&TxPoolError> {
        match self {
            TransactionError::Body { error, .. } => Some(error),
            _ => None,
        }
    }

    #[must_use]
    pub fn rollback_error(&self) -> Option<&TxPoolError> {
        match self {
            TransactionError::Body {
                rollback: Some(err),
                ..
            } => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn commit_error(&self) -> Option<&TxPoolError> {
        match self {
            TransactionError::Commit(err) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn disposition(&self) -> TxDisposition {
        match self {
            TransactionError::Begin(_) | TransactionError::Body { rollback: None, .. } => {
                TxDisposition::RolledBack
            }
            TransactionError::Body {
                rollback: Some(_), ..
            }
            | TransactionError::Commit(_) => TxDisposition::Ambiguous,
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::Begin(err) => write!(f, "transaction failed to begin: {err}"),
            TransactionError::Body {
                error,
                rollback: None,
            } => write!(f, "transaction body failed (rolled back): {error}"),
            TransactionError::Body {
                error,
                rollback: Some(rollback),
            } => write!(
                f,
                "transaction body failed: {error}; rollback also failed: {rollback}"
            ),
            TransactionError::Commit(err) => write!(f, "transaction failed to commit: {err}"),
        }
    }
}

impl std::error::Error for TransactionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransactionError::Begin(err) | TransactionError::Commit(err) => Some(err.as_ref()),
            TransactionError::Body { error, .. } => Some(error.as_ref()),
        }
    }
}
