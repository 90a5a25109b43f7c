#![allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]

//! Criterion benchmark for concurrent checkout and lookups through the pool.
//!
//! Each iteration fans a batch of single-row lookups (or bare lease/release cycles) out
//! across worker tasks that share one bounded pool, so waiter hand-off and the retrying
//! executor are on the measured path. `BENCH_CONCURRENCY` sets the number of workers and
//! `BENCH_LOOKUPS` the rows in the dataset.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rusqlite::{Connection, Result as RusqliteResult};
use sqlite_txpool::sqlite::SqliteManager;
use sqlite_txpool::test_utils::MockManager;
use sqlite_txpool::{ConfigAndPool, Pool, PoolConfig, RowValues, TxPoolError};
use std::fs;
use std::hint::black_box;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::task::JoinSet;

const SQLITE_SELECT: &str = "SELECT id, name, score, active FROM test WHERE id = ?1";
const POOL_SIZE: usize = 4;

struct Dataset {
    path: String,
    ids: Vec<i64>,
}

static TOKIO_RUNTIME: LazyLock<Runtime> =
    LazyLock::new(|| Runtime::new().expect("create tokio runtime"));

static DATASET: LazyLock<Dataset> = LazyLock::new(|| {
    let row_count = lookup_row_count_to_run();
    let path = PathBuf::from("benchmark_pool_checkout.db");
    prepare_sqlite_dataset(&path, row_count).expect("prepare sqlite dataset");

    let mut ids: Vec<i64> = (1..=row_count as i64).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(9_876_543_210);
    ids.shuffle(&mut rng);

    Dataset {
        path: path.to_string_lossy().into_owned(),
        ids,
    }
});

static SQLITE_POOL: LazyLock<ConfigAndPool<SqliteManager>> = LazyLock::new(|| {
    TOKIO_RUNTIME
        .block_on(
            ConfigAndPool::sqlite_builder(DATASET.path.clone())
                .min_connections(POOL_SIZE)
                .max_connections(POOL_SIZE)
                .build(),
        )
        .expect("create sqlite pool")
});

static BENCH_CONCURRENCY: LazyLock<usize> = LazyLock::new(|| concurrency_to_run().max(1));

fn lookup_row_count_to_run() -> usize {
    std::env::var("BENCH_LOOKUPS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(1024)
}

fn concurrency_to_run() -> usize {
    std::env::var("BENCH_CONCURRENCY")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8)
}

fn prepare_sqlite_dataset(path: &Path, row_count: usize) -> RusqliteResult<()> {
    if path.exists() {
        let _ = fs::remove_file(path);
    }

    let mut conn = Connection::open(path)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        CREATE TABLE test (
            id      INTEGER PRIMARY KEY,
            name    TEXT NOT NULL,
            score   REAL NOT NULL,
            active  INTEGER NOT NULL
        );
        ",
    )?;

    let tx = conn.transaction()?;
    {
        let mut insert_stmt =
            tx.prepare("INSERT INTO test (id, name, score, active) VALUES (?1, ?2, ?3, ?4)")?;
        for id in 1..=row_count as i64 {
            let name = format!("name-{id}");
            let score = id as f64 * 0.5;
            insert_stmt.execute(rusqlite::params![id, name, score, i32::from(id % 2 == 0)])?;
        }
    }
    tx.commit()?;
    Ok(())
}

async fn parallel_select(
    db: &ConfigAndPool<SqliteManager>,
    ids: &[i64],
    concurrency: usize,
) -> Result<(), TxPoolError> {
    let per_worker = ids.len().div_ceil(concurrency).max(1);
    let mut join_set = JoinSet::new();

    for chunk in ids.chunks(per_worker) {
        let db = db.clone();
        let chunk = chunk.to_vec();
        join_set.spawn(async move {
            for id in chunk {
                let result = db.execute(SQLITE_SELECT, &[RowValues::Int(id)]).await?;
                black_box(result.first());
            }
            Ok::<(), TxPoolError>(())
        });
    }

    while let Some(outcome) = join_set.join_next().await {
        outcome.expect("select worker panicked")?;
    }
    Ok(())
}

async fn parallel_checkout(pool: &Pool<MockManager>, concurrency: usize) -> Result<(), TxPoolError> {
    let mut join_set = JoinSet::new();
    for _ in 0..concurrency {
        let pool = pool.clone();
        join_set.spawn(async move {
            for _ in 0..16 {
                let lease = pool.lease().await?;
                tokio::task::yield_now().await;
                pool.release(lease).await;
            }
            Ok::<(), TxPoolError>(())
        });
    }

    while let Some(outcome) = join_set.join_next().await {
        outcome.expect("checkout worker panicked")?;
    }
    Ok(())
}

fn time_iterations<F, Fut>(iters: u64, mut run: F) -> impl Future<Output = Duration>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    async move {
        let mut total = Duration::default();
        for _ in 0..iters {
            let start = Instant::now();
            run().await;
            total += start.elapsed();
        }
        total
    }
}

fn benchmark_sqlite_parallel_select(
    group: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>,
) {
    let ids = DATASET.ids.clone();
    let db = SQLITE_POOL.clone();
    let concurrency = *BENCH_CONCURRENCY;

    group.bench_function(BenchmarkId::new("sqlite_parallel_select", concurrency), |b| {
        b.to_async(&*TOKIO_RUNTIME).iter_custom(|iters| {
            let ids = ids.clone();
            let db = db.clone();
            time_iterations(iters, move || {
                let ids = ids.clone();
                let db = db.clone();
                async move {
                    parallel_select(&db, &ids, concurrency)
                        .await
                        .expect("sqlite parallel select");
                }
            })
        });
    });
}

fn benchmark_mock_checkout(
    group: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>,
) {
    let concurrency = *BENCH_CONCURRENCY;
    let config = PoolConfig::builder()
        .max_connections(POOL_SIZE)
        .build()
        .expect("valid pool config");
    let pool = Pool::new(MockManager::new(), config).expect("create mock pool");

    group.bench_function(BenchmarkId::new("mock_pool_checkout", concurrency), |b| {
        b.to_async(&*TOKIO_RUNTIME).iter_custom(|iters| {
            let pool = pool.clone();
            time_iterations(iters, move || {
                let pool = pool.clone();
                async move {
                    parallel_checkout(&pool, concurrency)
                        .await
                        .expect("mock pool checkout");
                }
            })
        });
    });
}

fn pool_checkout(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_checkout");
    group.throughput(Throughput::Elements(DATASET.ids.len() as u64));

    benchmark_sqlite_parallel_select(&mut group);
    benchmark_mock_checkout(&mut group);

    group.finish();
}

criterion_group!(benches, pool_checkout);
criterion_main!(benches);
