use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlite_txpool::test_utils::MockManager;
use sqlite_txpool::{Pool, PoolConfig, TxPoolError};
use tokio::task::JoinSet;

fn pool(manager: &MockManager, max: usize) -> Result<Pool<MockManager>, TxPoolError> {
    let config = PoolConfig::builder().max_connections(max).build()?;
    Pool::new(manager.clone(), config)
}

/// Many concurrent leasers never push the pool past its ceiling, and no connection is
/// held by two of them at once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_leases_respect_ceiling_and_ownership() -> Result<(), TxPoolError> {
    let manager = MockManager::new();
    manager.open_delay(Duration::from_millis(2));
    let pool = pool(&manager, 3)?;
    let holders: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));

    let mut tasks = JoinSet::new();
    for i in 0..60u64 {
        let pool = pool.clone();
        let holders = Arc::clone(&holders);
        tasks.spawn(async move {
            let lease = pool.lease().await?;
            let id = lease.id();
            assert!(
                holders.lock().unwrap().insert(id),
                "connection {id} handed to two holders"
            );
            assert!(pool.connection_count() <= 3);
            tokio::time::sleep(Duration::from_millis(i % 4)).await;
            holders.lock().unwrap().remove(&id);
            pool.release(lease).await;
            Ok::<_, TxPoolError>(())
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.expect("lease task panicked")?;
    }

    assert!(manager.peak_live() <= 3, "peak {}", manager.peak_live());
    assert_eq!(manager.opened(), pool.connection_count());
    let status = pool.status();
    assert_eq!(status.idle_connections, status.total_connections);
    assert_eq!(status.waiters, 0);
    Ok(())
}

/// Failed opens give their slot back, so the ceiling is never permanently consumed.
#[tokio::test]
async fn failed_opens_do_not_leak_capacity() -> Result<(), TxPoolError> {
    let manager = MockManager::new();
    let pool = pool(&manager, 2)?;

    manager.fail_next_opens(5);
    for _ in 0..5 {
        let err = pool.lease().await.unwrap_err();
        assert!(matches!(err, TxPoolError::OpenFailed(_)));
    }
    assert_eq!(pool.connection_count(), 0);

    let a = pool.lease().await?;
    let b = pool.lease().await?;
    assert_eq!(pool.connection_count(), 2);
    assert_ne!(a.id(), b.id());
    pool.release(a).await;
    pool.release(b).await;
    Ok(())
}

/// A waiter queued behind a broken connection receives a freshly opened one.
#[tokio::test]
async fn broken_connection_slot_goes_to_queued_waiter() -> Result<(), TxPoolError> {
    let manager = MockManager::new();
    let pool = pool(&manager, 1)?;

    let mut held = pool.lease().await?;
    let old_id = held.id();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.lease().await.map(|lease| lease.id()) })
    };
    while pool.status().waiters == 0 {
        tokio::task::yield_now().await;
    }

    held.mark_broken();
    pool.release(held).await;

    let new_id = waiter.await.expect("waiter panicked")?;
    assert_ne!(new_id, old_id);
    assert_eq!(manager.closed(), 1);
    assert_eq!(manager.opened(), 2);
    assert_eq!(pool.connection_count(), 1);
    Ok(())
}

/// When the replacement open fails, the waiter holding the slot sees `OpenFailed`.
#[tokio::test]
async fn replacement_open_failure_reaches_the_waiter() -> Result<(), TxPoolError> {
    let manager = MockManager::new();
    let pool = pool(&manager, 1)?;

    let mut held = pool.lease().await?;
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.lease().await.map(|lease| lease.id()) })
    };
    while pool.status().waiters == 0 {
        tokio::task::yield_now().await;
    }

    manager.fail_next_opens(1);
    held.mark_broken();
    pool.release(held).await;

    let err = waiter.await.expect("waiter panicked").unwrap_err();
    assert!(matches!(err, TxPoolError::OpenFailed(_)));
    assert_eq!(pool.connection_count(), 0);
    Ok(())
}
