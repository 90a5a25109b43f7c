use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::config::SqliteOptions;
use super::connection::{SqliteConnection, apply_wal_pragmas};
use crate::error::TxPoolError;
use crate::manager::ConnectionManager;

/// Busy timeout used only while switching a new connection to WAL, since that pragma
/// needs a brief exclusive lock when several connections open at once.
const WAL_SETUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens and closes `rusqlite` connections to one database file.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    db_path: String,
    wal: bool,
    busy_timeout: Duration,
}

impl SqliteManager {
    /// Manager for `db_path` with WAL on and no driver-level busy wait.
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            wal: true,
            busy_timeout: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn from_options(opts: &SqliteOptions) -> Self {
        Self {
            db_path: opts.db_path.clone(),
            wal: opts.wal,
            busy_timeout: opts.busy_timeout,
        }
    }

    #[must_use]
    pub fn with_wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }

    /// How long `SQLite` itself waits on a lock before reporting `SQLITE_BUSY`.
    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn db_path(&self) -> &str {
        &self.db_path
    }
}

fn open_connection(
    db_path: &str,
    wal: bool,
    busy_timeout: Duration,
) -> Result<rusqlite::Connection, TxPoolError> {
    let conn = rusqlite::Connection::open(db_path)?;
    if wal {
        conn.busy_timeout(WAL_SETUP_TIMEOUT)?;
        apply_wal_pragmas(&conn)?;
    }
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

#[async_trait]
impl ConnectionManager for SqliteManager {
    type Connection = SqliteConnection;

    async fn connect(&self) -> Result<SqliteConnection, TxPoolError> {
        let db_path = self.db_path.clone();
        let (wal, busy_timeout) = (self.wal, self.busy_timeout);
        let conn = tokio::task::spawn_blocking(move || open_connection(&db_path, wal, busy_timeout))
            .await
            .map_err(|e| {
                TxPoolError::ConnectionError(format!("sqlite open join error: {e}"))
            })??;
        debug!(db_path = %self.db_path, "opened sqlite connection");
        Ok(SqliteConnection::new(conn))
    }

    async fn close(&self, conn: SqliteConnection) -> Result<(), TxPoolError> {
        conn.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::AsyncDatabaseExecutor;
    use crate::types::RowValues;

    #[tokio::test]
    async fn new_connections_use_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.db");
        let manager = SqliteManager::new(path.to_string_lossy());

        let mut conn = manager.connect().await.unwrap();
        let mode = conn.execute("PRAGMA journal_mode", &[]).await.unwrap();
        assert_eq!(
            mode.first()
                .and_then(|row| row.get_by_index(0))
                .and_then(RowValues::as_text),
            Some("wal")
        );
        manager.close(conn).await.unwrap();
    }

    #[tokio::test]
    async fn missing_directory_fails_to_open() {
        let manager = SqliteManager::new("/nonexistent-dir/for/sure/db.sqlite");
        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, TxPoolError::SqliteError(_)));
    }
}
