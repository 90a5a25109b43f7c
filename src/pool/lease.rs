use std::fmt;
use std::ops::{Deref, DerefMut};

use super::Pool;
use crate::manager::ConnectionManager;

/// Exclusive ownership of one pooled connection.
///
/// Give it back with [`Pool::release`] (or [`Lease::release`]). A lease that is simply
/// dropped is checked back in as well; if the connection then needs closing, the close is
/// spawned onto the current Tokio runtime.
pub struct Lease<M: ConnectionManager> {
    pool: Pool<M>,
    conn: Option<M::Connection>,
    broken: bool,
}

impl<M: ConnectionManager> Lease<M> {
    pub(super) fn new(pool: Pool<M>, conn: M::Connection) -> Self {
        Self {
            pool,
            conn: Some(conn),
            broken: false,
        }
    }

    /// Close this connection on release instead of returning it to service.
    ///
    /// Use after an error that leaves the session in an unknown state (for example a
    /// failed `ROLLBACK`). The slot under the ceiling is handed to the next waiter.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub(crate) fn clear_broken(&mut self) {
        self.broken = false;
    }

    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Return the connection to the pool it was leased from.
    pub async fn release(self) {
        let pool = self.pool.clone();
        pool.release(self).await;
    }

    pub(super) fn take(&mut self) -> Option<(M::Connection, bool)> {
        self.conn.take().map(|conn| (conn, self.broken))
    }
}

impl<M: ConnectionManager> Deref for Lease<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("lease holds its connection until released")
    }
}

impl<M: ConnectionManager> DerefMut for Lease<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("lease holds its connection until released")
    }
}

impl<M: ConnectionManager> Drop for Lease<M> {
    fn drop(&mut self) {
        if let Some((conn, broken)) = self.take() {
            self.pool.check_in_detached(conn, broken);
        }
    }
}

impl<M: ConnectionManager> fmt::Debug for Lease<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}
