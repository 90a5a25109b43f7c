use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::oneshot;

/// Point-in-time view of the pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Physical connections open or being opened.
    pub total_connections: usize,
    /// Connections parked on the idle stack.
    pub idle_connections: usize,
    /// Lease requests queued behind the connection ceiling.
    pub waiters: usize,
    pub is_shutdown: bool,
}

/// What a queued waiter can be handed.
///
/// `OpenSlot` transfers an already-counted slot under the ceiling: the receiver must open
/// the connection itself (or give the slot back on failure).
pub(crate) enum Grant<C> {
    Connection(C),
    OpenSlot,
}

pub(crate) struct Waiter<C> {
    pub(crate) id: u64,
    pub(crate) respond_to: oneshot::Sender<Grant<C>>,
}

/// All mutable pool state. Only touched while holding the pool mutex, and the mutex is
/// never held across an `.await`.
pub(crate) struct PoolState<C> {
    /// LIFO: the most recently released connection is reused first.
    pub(crate) idle: Vec<C>,
    /// FIFO queue of leases waiting for a connection.
    pub(crate) waiters: VecDeque<Waiter<C>>,
    pub(crate) total_connections: usize,
    pub(crate) next_waiter_id: u64,
    pub(crate) is_shutdown: bool,
}

impl<C> PoolState<C> {
    pub(crate) fn new() -> Self {
        Self {
            idle: Vec::new(),
            waiters: VecDeque::new(),
            total_connections: 0,
            next_waiter_id: 0,
            is_shutdown: false,
        }
    }

    pub(crate) fn enqueue_waiter(&mut self) -> (u64, oneshot::Receiver<Grant<C>>) {
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        let (respond_to, rx) = oneshot::channel();
        self.waiters.push_back(Waiter { id, respond_to });
        (id, rx)
    }

    /// Remove a waiter by id. Returns false when it was already dequeued (resolved).
    pub(crate) fn remove_waiter(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|waiter| waiter.id == id) {
            Some(pos) => {
                self.waiters.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Hand `grant` to the oldest waiter still listening.
    ///
    /// Waiters whose receiver is gone are skipped. Returns the grant when nobody took it.
    pub(crate) fn offer(&mut self, mut grant: Grant<C>) -> Option<Grant<C>> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.respond_to.send(grant) {
                Ok(()) => {
                    tracing::debug!(waiter = waiter.id, "granted to queued waiter");
                    return None;
                }
                Err(returned) => grant = returned,
            }
        }
        Some(grant)
    }

    /// Give a grant back to the pool: to a waiter, else onto the idle stack (connections)
    /// or off the books (open slots).
    pub(crate) fn restore(&mut self, grant: Grant<C>) {
        match self.offer(grant) {
            None => {}
            Some(Grant::Connection(conn)) => self.idle.push(conn),
            Some(Grant::OpenSlot) => {
                self.total_connections = self.total_connections.saturating_sub(1);
            }
        }
    }

    pub(crate) fn status(&self) -> PoolStatus {
        PoolStatus {
            total_connections: self.total_connections,
            idle_connections: self.idle.len(),
            waiters: self.waiters.len(),
            is_shutdown: self.is_shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_skips_abandoned_waiters() {
        let mut state: PoolState<u32> = PoolState::new();
        state.total_connections = 1;
        let (_gone, rx_gone) = state.enqueue_waiter();
        let (_live, mut rx_live) = state.enqueue_waiter();
        drop(rx_gone);

        assert!(state.offer(Grant::Connection(7)).is_none());
        assert!(matches!(rx_live.try_recv(), Ok(Grant::Connection(7))));
        assert!(state.waiters.is_empty());
    }

    #[test]
    fn unclaimed_slot_is_refunded() {
        let mut state: PoolState<u32> = PoolState::new();
        state.total_connections = 2;
        state.restore(Grant::OpenSlot);
        assert_eq!(state.total_connections, 1);

        state.restore(Grant::Connection(3));
        assert_eq!(state.idle, vec![3]);
    }

    #[test]
    fn waiter_ids_are_unique_and_removable() {
        let mut state: PoolState<u32> = PoolState::new();
        let (a, _rx_a) = state.enqueue_waiter();
        let (b, _rx_b) = state.enqueue_waiter();
        assert_ne!(a, b);
        assert!(state.remove_waiter(a));
        assert!(!state.remove_waiter(a));
        assert_eq!(state.waiters.front().map(|w| w.id), Some(b));
    }
}
