//! Bounded connection pool.
//!
//! All bookkeeping (`idle`, `waiters`, `total_connections`, `is_shutdown`) lives in one
//! [`PoolState`] behind a `std::sync::Mutex`. The lock is only held to update that state;
//! opening, closing and executing always happen after the guard is dropped.

pub mod config;
pub mod lease;
pub mod types;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Semaphore, SemaphorePermit, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TxPoolError;
use crate::manager::ConnectionManager;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use lease::Lease;
pub use types::PoolStatus;

use types::{Grant, PoolState};

/// A bounded, shareable pool of connections produced by `M`.
///
/// Cloning is cheap and every clone refers to the same pool.
pub struct Pool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

struct PoolInner<M: ConnectionManager> {
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Connection>>,
    tx_permit: Option<Semaphore>,
}

/// Where a checked-in connection ends up.
enum CheckIn<C> {
    Returned,
    Close(C),
}

impl<M: ConnectionManager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ConnectionManager> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

impl<M: ConnectionManager> Pool<M> {
    /// Build a pool. No connection is opened until [`Pool::warmup`] or the first lease.
    ///
    /// # Errors
    /// Returns `TxPoolError::ConfigError` if `config` fails validation.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self, TxPoolError> {
        config.validate()?;
        let tx_permit = config.serialize_transactions.then(|| Semaphore::new(1));
        Ok(Self {
            inner: Arc::new(PoolInner {
                manager,
                config,
                state: Mutex::new(PoolState::new()),
                tx_permit,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    fn state(&self) -> MutexGuard<'_, PoolState<M::Connection>> {
        // Pool state is updated in single steps, so a poisoned guard is still consistent.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Open connections until `min_connections` exist. A no-op after shutdown.
    ///
    /// # Errors
    /// Returns `TxPoolError::OpenFailed` on the first connection that fails to open.
    /// Connections opened before the failure stay in the pool.
    pub async fn warmup(&self) -> Result<(), TxPoolError> {
        loop {
            {
                let mut state = self.state();
                if state.is_shutdown
                    || state.total_connections >= self.inner.config.min_connections
                {
                    return Ok(());
                }
                state.total_connections += 1;
            }
            let slot = SlotReservation::new(self);
            let conn = self.inner.manager.connect().await.map_err(|err| {
                warn!(error = %err, "warmup failed to open connection");
                TxPoolError::OpenFailed(Box::new(err))
            })?;
            slot.disarm();
            debug!("warmup opened connection");
            if let CheckIn::Close(conn) = self.check_in(conn, false) {
                self.retire(conn).await;
            }
        }
    }

    /// Lease a connection, waiting in line if the pool is at its ceiling.
    ///
    /// Dropping the returned future while it waits removes the request from the queue.
    ///
    /// # Errors
    /// Returns `TxPoolError::PoolShutdown` if the pool is (or becomes) shut down, or
    /// `TxPoolError::OpenFailed` if a new connection could not be opened.
    pub async fn lease(&self) -> Result<Lease<M>, TxPoolError> {
        self.acquire(None).await
    }

    /// Like [`Pool::lease`], but a queued wait is abandoned when `token` is cancelled.
    ///
    /// # Errors
    /// Returns `TxPoolError::Cancelled` if `token` fires before a connection is granted,
    /// otherwise the same errors as [`Pool::lease`].
    pub async fn lease_with_cancel(
        &self,
        token: &CancellationToken,
    ) -> Result<Lease<M>, TxPoolError> {
        self.acquire(Some(token)).await
    }

    async fn acquire(&self, token: Option<&CancellationToken>) -> Result<Lease<M>, TxPoolError> {
        let queued = {
            let mut state = self.state();
            if state.is_shutdown {
                return Err(TxPoolError::PoolShutdown);
            }
            if let Some(conn) = state.idle.pop() {
                debug!(idle = state.idle.len(), "leased idle connection");
                return Ok(Lease::new(self.clone(), conn));
            }
            if state.total_connections < self.inner.config.max_connections {
                state.total_connections += 1;
                None
            } else {
                let (id, rx) = state.enqueue_waiter();
                debug!(waiter = id, queued = state.waiters.len(), "pool at capacity; queued");
                Some((id, rx))
            }
        };

        match queued {
            None => self.open_reserved(SlotReservation::new(self)).await,
            Some((id, rx)) => self.wait(id, rx, token).await,
        }
    }

    async fn open_reserved(&self, slot: SlotReservation<'_, M>) -> Result<Lease<M>, TxPoolError> {
        match self.inner.manager.connect().await {
            Ok(conn) => {
                slot.disarm();
                debug!("opened new connection");
                Ok(Lease::new(self.clone(), conn))
            }
            Err(err) => {
                warn!(error = %err, "failed to open connection");
                Err(TxPoolError::OpenFailed(Box::new(err)))
            }
        }
    }

    async fn wait(
        &self,
        id: u64,
        rx: oneshot::Receiver<Grant<M::Connection>>,
        token: Option<&CancellationToken>,
    ) -> Result<Lease<M>, TxPoolError> {
        let mut pending = PendingLease {
            pool: self,
            id,
            rx: Some(rx),
        };
        let grant = match token {
            Some(token) => {
                tokio::select! {
                    biased;
                    grant = pending.recv() => grant?,
                    () = token.cancelled() => {
                        debug!(waiter = id, "lease wait cancelled");
                        return Err(TxPoolError::Cancelled);
                    }
                }
            }
            None => pending.recv().await?,
        };
        match grant {
            Grant::Connection(conn) => Ok(Lease::new(self.clone(), conn)),
            Grant::OpenSlot => self.open_reserved(SlotReservation::new(self)).await,
        }
    }

    /// Give a leased connection back.
    ///
    /// The oldest queued waiter receives it directly; otherwise it goes on the idle stack.
    /// After shutdown, or when the lease was marked broken, the connection is closed
    /// instead. Close failures are logged, never returned.
    pub async fn release(&self, mut lease: Lease<M>) {
        let Some((conn, broken)) = lease.take() else {
            return;
        };
        drop(lease);
        if let CheckIn::Close(conn) = self.check_in(conn, broken) {
            self.retire(conn).await;
        }
    }

    fn check_in(&self, conn: M::Connection, broken: bool) -> CheckIn<M::Connection> {
        let mut state = self.state();
        if state.is_shutdown || broken {
            // Still counted against the ceiling until the close finishes.
            return CheckIn::Close(conn);
        }
        state.restore(Grant::Connection(conn));
        CheckIn::Returned
    }

    /// Check-in path for a lease dropped without `release`; any close runs on a spawned task.
    pub(crate) fn check_in_detached(&self, conn: M::Connection, broken: bool) {
        if let CheckIn::Close(conn) = self.check_in(conn, broken) {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let pool = self.clone();
                handle.spawn(async move {
                    pool.retire(conn).await;
                });
            } else {
                drop(conn);
                self.forfeit_slot();
            }
        }
    }

    /// Close a connection permanently, then free its slot under the ceiling.
    async fn retire(&self, conn: M::Connection) {
        let _slot = SlotReservation::new(self);
        if let Err(err) = self.inner.manager.close(conn).await {
            warn!(error = %err, "failed to close connection; discarding it");
        }
    }

    /// Give up one counted slot: to the oldest waiter (who opens a fresh connection with
    /// it) or off the books.
    fn forfeit_slot(&self) {
        let mut state = self.state();
        if state.is_shutdown {
            state.total_connections = state.total_connections.saturating_sub(1);
        } else {
            state.restore(Grant::OpenSlot);
        }
    }

    /// Stop the pool. Idempotent.
    ///
    /// Idle connections are closed, queued waiters fail with `PoolShutdown`, and connections
    /// still leased are closed when their holders release them.
    pub async fn shutdown(&self) {
        let idle = {
            let mut state = self.state();
            if state.is_shutdown {
                return;
            }
            state.is_shutdown = true;
            // Dropping the senders resolves every waiter with `PoolShutdown`.
            state.waiters.clear();
            std::mem::take(&mut state.idle)
        };
        if let Some(permit) = &self.inner.tx_permit {
            permit.close();
        }
        info!(idle = idle.len(), "shutting down connection pool");
        for conn in idle {
            self.retire(conn).await;
        }
    }

    /// Physical connections currently open or being opened.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state().total_connections
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.state().status()
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state().is_shutdown
    }

    /// The pool-wide transaction permit, when `serialize_transactions` is on.
    pub(crate) async fn transaction_permit(
        &self,
    ) -> Result<Option<SemaphorePermit<'_>>, TxPoolError> {
        match &self.inner.tx_permit {
            Some(permit) => permit
                .acquire()
                .await
                .map(Some)
                .map_err(|_| TxPoolError::PoolShutdown),
            None => Ok(None),
        }
    }
}

/// One counted slot under the ceiling with no connection in it yet. Dropping it while
/// armed gives the slot back.
struct SlotReservation<'a, M: ConnectionManager> {
    pool: &'a Pool<M>,
    armed: bool,
}

impl<'a, M: ConnectionManager> SlotReservation<'a, M> {
    fn new(pool: &'a Pool<M>) -> Self {
        Self { pool, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<M: ConnectionManager> Drop for SlotReservation<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.forfeit_slot();
        }
    }
}

/// A queued lease request. Dropping it before it resolves takes it out of the queue; if a
/// grant already arrived, the grant goes back to the pool.
struct PendingLease<'a, M: ConnectionManager> {
    pool: &'a Pool<M>,
    id: u64,
    rx: Option<oneshot::Receiver<Grant<M::Connection>>>,
}

impl<M: ConnectionManager> PendingLease<'_, M> {
    async fn recv(&mut self) -> Result<Grant<M::Connection>, TxPoolError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(TxPoolError::ConnectionError(
                "lease request already resolved".into(),
            ));
        };
        let outcome = rx.await;
        self.rx = None;
        // The sender is only dropped unanswered by shutdown.
        outcome.map_err(|_| TxPoolError::PoolShutdown)
    }
}

impl<M: ConnectionManager> Drop for PendingLease<'_, M> {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        let removed = self.pool.state().remove_waiter(self.id);
        if removed {
            return;
        }
        // Grants are sent under the pool lock, so once the waiter is gone from the queue
        // any grant is already in the channel.
        rx.close();
        match rx.try_recv() {
            Ok(Grant::Connection(conn)) => self.pool.check_in_detached(conn, false),
            Ok(Grant::OpenSlot) => self.pool.forfeit_slot(),
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockManager;

    fn pool(min: usize, max: usize) -> (MockManager, Pool<MockManager>) {
        let manager = MockManager::new();
        let config = PoolConfig::builder()
            .min_connections(min)
            .max_connections(max)
            .build()
            .unwrap();
        (manager.clone(), Pool::new(manager, config).unwrap())
    }

    #[tokio::test]
    async fn idle_connections_are_reused_lifo() {
        let (_manager, pool) = pool(0, 3);
        let a = pool.lease().await.unwrap();
        let b = pool.lease().await.unwrap();
        let (a_id, b_id) = (a.id(), b.id());
        pool.release(a).await;
        pool.release(b).await;

        let next = pool.lease().await.unwrap();
        assert_eq!(next.id(), b_id);
        let after = pool.lease().await.unwrap();
        assert_eq!(after.id(), a_id);
        assert_eq!(pool.connection_count(), 2);
    }

    #[tokio::test]
    async fn failed_open_refunds_the_ceiling() {
        let (manager, pool) = pool(0, 1);
        manager.fail_next_opens(1);
        let err = pool.lease().await.unwrap_err();
        assert!(matches!(err, TxPoolError::OpenFailed(_)));
        assert_eq!(pool.connection_count(), 0);

        let lease = pool.lease().await.unwrap();
        assert_eq!(pool.connection_count(), 1);
        drop(lease);
    }

    #[tokio::test]
    async fn warmup_opens_up_to_minimum() {
        let (manager, pool) = pool(3, 5);
        pool.warmup().await.unwrap();
        assert_eq!(pool.connection_count(), 3);
        assert_eq!(pool.status().idle_connections, 3);
        assert_eq!(manager.opened(), 3);

        pool.warmup().await.unwrap();
        assert_eq!(manager.opened(), 3);
    }

    #[tokio::test]
    async fn partial_warmup_keeps_opened_connections() {
        let (manager, pool) = pool(3, 3);
        manager.fail_opens_after(2);
        let err = pool.warmup().await.unwrap_err();
        assert!(matches!(err, TxPoolError::OpenFailed(_)));
        assert_eq!(pool.connection_count(), 2);
        assert_eq!(pool.status().idle_connections, 2);
    }

    #[tokio::test]
    async fn dropped_lease_is_checked_back_in() {
        let (_manager, pool) = pool(0, 1);
        let lease = pool.lease().await.unwrap();
        let id = lease.id();
        drop(lease);
        assert_eq!(pool.status().idle_connections, 1);
        assert_eq!(pool.lease().await.unwrap().id(), id);
    }

    #[tokio::test]
    async fn broken_lease_is_closed_and_slot_freed() {
        let (manager, pool) = pool(0, 1);
        let mut lease = pool.lease().await.unwrap();
        let id = lease.id();
        lease.mark_broken();
        pool.release(lease).await;

        assert_eq!(manager.closed(), 1);
        assert_eq!(pool.connection_count(), 0);
        let fresh = pool.lease().await.unwrap();
        assert_ne!(fresh.id(), id);
    }

    #[tokio::test]
    async fn cleared_lease_returns_to_idle() {
        let (manager, pool) = pool(0, 1);
        let mut lease = pool.lease().await.unwrap();
        let id = lease.id();
        lease.mark_broken();
        lease.clear_broken();
        assert!(!lease.is_broken());
        pool.release(lease).await;

        assert_eq!(manager.closed(), 0);
        assert_eq!(pool.status().idle_connections, 1);
        assert_eq!(pool.lease().await.unwrap().id(), id);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (manager, pool) = pool(2, 2);
        pool.warmup().await.unwrap();
        pool.shutdown().await;
        pool.shutdown().await;
        assert_eq!(manager.closed(), 2);
        assert_eq!(pool.connection_count(), 0);
        assert!(pool.is_shutdown());
        assert!(matches!(
            pool.lease().await.unwrap_err(),
            TxPoolError::PoolShutdown
        ));
        pool.warmup().await.unwrap();
        assert_eq!(manager.opened(), 2);
    }
}
