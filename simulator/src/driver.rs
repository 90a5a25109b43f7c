#[cfg(feature = "sqlite")]
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use sqlite_txpool::test_utils::MockManager;
use sqlite_txpool::{
    ConfigAndPool, ConnectionManager, PoolConfig, RowValues, TxDisposition, TxPoolError,
};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::args::{BackendKind, SimConfig};
use crate::logging::EventLog;
use crate::model::{Ledger, LedgerStats, TxOutcome};
use crate::oracle::{MockCounts, Oracle};
use crate::plan::{TxPlan, share_of};

const CREATE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS ledger (
    tx_id  INTEGER NOT NULL,
    seq    INTEGER NOT NULL,
    amount INTEGER NOT NULL,
    PRIMARY KEY (tx_id, seq)
);";
const INSERT_ENTRY: &str = "INSERT INTO ledger (tx_id, seq, amount) VALUES (?1, ?2, ?3)";
const ROWS_BY_TX: &str = "SELECT tx_id, count(*) AS n FROM ledger GROUP BY tx_id";
const AMOUNT_TOTAL: &str = "SELECT coalesce(sum(amount), 0) AS total FROM ledger";

#[derive(Debug, Serialize)]
pub(crate) struct Report {
    pub(crate) stats: LedgerStats,
    pub(crate) peak_connections: usize,
    pub(crate) elapsed_ms: u64,
}

pub(crate) fn run(config: SimConfig, rng: &mut ChaCha8Rng) -> Result<Report, String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.tasks.clamp(2, 8))
        .enable_all()
        .build()
        .map_err(|err| format!("failed to start runtime: {err}"))?;
    let events = EventLog::new(config.first_events, config.tail_events);

    let result = runtime.block_on(async {
        match config.backend {
            #[cfg(feature = "sqlite")]
            BackendKind::Sqlite => run_sqlite(&config, rng, &events).await,
            #[cfg(not(feature = "sqlite"))]
            BackendKind::Sqlite => Err("built without the sqlite feature".to_string()),
            BackendKind::Mock => run_mock(&config, rng, &events).await,
        }
    });
    if result.is_err() {
        events.dump();
    }
    result
}

#[cfg(feature = "sqlite")]
async fn run_sqlite(
    config: &SimConfig,
    rng: &mut ChaCha8Rng,
    events: &EventLog,
) -> Result<Report, String> {
    let scratch = config.db_path.is_none();
    let path = config.db_path.clone().unwrap_or_else(|| {
        std::env::temp_dir().join(format!("txpool-sim-{}.db", config.seed))
    });
    remove_database_files(&path);
    tracing::info!("sqlite database: {}", path.display());

    let db = ConfigAndPool::sqlite_builder(path.to_string_lossy().into_owned())
        .min_connections(config.min_connections)
        .max_connections(config.pool_size)
        .transaction_behavior(config.behavior)
        .serialize_transactions(config.serialize_transactions)
        .build()
        .await
        .map_err(|err| format!("failed to open pool: {err}"))?;
    db.execute_batch(CREATE_LEDGER)
        .await
        .map_err(|err| format!("failed to create ledger table: {err}"))?;

    let (ledger, peak_connections, elapsed) = drive(&db, config, rng, events).await?;
    Oracle::check_quiescent(&db.status())?;

    let stored = stored_rows(&db).await?;
    Oracle::check_rows(&ledger, &stored)?;
    if ledger.ambiguous.is_empty() {
        let total = stored_amount(&db).await?;
        if total != ledger.stats.committed_amount {
            return Err(format!(
                "ledger sums to {total}, committed transactions wrote {}",
                ledger.stats.committed_amount
            ));
        }
    }

    finish(&db).await?;
    if scratch {
        remove_database_files(&path);
    }
    Ok(report(ledger, peak_connections, elapsed))
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
async fn run_mock(
    config: &SimConfig,
    rng: &mut ChaCha8Rng,
    events: &EventLog,
) -> Result<Report, String> {
    let manager = MockManager::new();
    manager.statement_delay(Duration::from_micros(200));
    let injected = (config.transactions as f64 * config.busy_rate).round() as usize;
    if injected > 0 {
        manager.busy_on("INSERT", Some(injected));
    }

    let pool_config = PoolConfig::builder()
        .min_connections(config.min_connections)
        .max_connections(config.pool_size)
        .transaction_behavior(config.behavior)
        .serialize_transactions(config.serialize_transactions)
        .build()
        .map_err(|err| format!("invalid pool config: {err}"))?;
    let db = ConfigAndPool::new(manager.clone(), pool_config)
        .map_err(|err| format!("failed to create pool: {err}"))?;
    db.warmup()
        .await
        .map_err(|err| format!("warmup failed: {err}"))?;

    let (ledger, peak_connections, elapsed) = drive(&db, config, rng, events).await?;
    Oracle::check_quiescent(&db.status())?;
    finish(&db).await?;

    let statements = manager.statements();
    let count = |name: &str| statements.iter().filter(|s| s.as_str() == name).count() as u64;
    let counts = MockCounts {
        commits: count("COMMIT"),
        rollbacks: count("ROLLBACK"),
        peak_live: manager.peak_live(),
        live_after_shutdown: manager.live(),
        opened: manager.opened(),
        closed: manager.closed(),
    };
    tracing::info!(
        "mock: {} statement(s), {} connection(s) opened, {injected} busy repl(ies) injected",
        statements.len(),
        counts.opened
    );
    Oracle::check_mock(&ledger, &counts, config.pool_size)?;
    Ok(report(ledger, peak_connections, elapsed))
}

/// Run every worker's plans against `db` while a monitor samples the connection count.
async fn drive<M: ConnectionManager>(
    db: &ConfigAndPool<M>,
    config: &SimConfig,
    rng: &mut ChaCha8Rng,
    events: &EventLog,
) -> Result<(Ledger, usize, Duration), String> {
    let stop = Arc::new(AtomicBool::new(false));
    let peak = Arc::new(AtomicUsize::new(0));
    let monitor = {
        let db = db.clone();
        let stop = Arc::clone(&stop);
        let peak = Arc::clone(&peak);
        tokio::spawn(async move {
            while !stop.load(Ordering::Acquire) {
                peak.fetch_max(db.status().total_connections, Ordering::AcqRel);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let started = Instant::now();
    let deadline = config
        .duration_ms
        .map(|ms| started + Duration::from_millis(ms));
    let mut workers = JoinSet::new();
    for worker in 0..config.tasks {
        let db = db.clone();
        let config = config.clone();
        let events = events.clone();
        let mut worker_rng = ChaCha8Rng::seed_from_u64(rng.random());
        let budget = share_of(config.transactions, config.tasks, worker);
        workers.spawn(async move {
            let mut ledger = Ledger::default();
            for n in 0..budget {
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    break;
                }
                let id = n * config.tasks as u64 + worker as u64 + 1;
                let plan = TxPlan::generate(&mut worker_rng, &config, id, worker);
                let outcome = execute_plan(&db, &plan).await;
                events.push(format!("{} -> {outcome:?}", plan.describe()));
                ledger.record(&plan, &outcome);
            }
            ledger
        });
    }

    let mut ledger = Ledger::default();
    let mut failed = None;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(part) => ledger.merge(part),
            Err(err) => failed = Some(format!("worker task failed: {err}")),
        }
    }
    stop.store(true, Ordering::Release);
    let _ = monitor.await;
    if let Some(err) = failed {
        return Err(err);
    }

    let peak = peak.load(Ordering::Acquire);
    Oracle::check_ceiling(peak, config.pool_size)?;
    tracing::info!(
        "{} transaction(s) finished, peak {peak} connection(s)",
        ledger.finished()
    );
    Ok((ledger, peak, started.elapsed()))
}

async fn execute_plan<M: ConnectionManager>(db: &ConfigAndPool<M>, plan: &TxPlan) -> TxOutcome {
    let tx_id = i64::try_from(plan.id).unwrap_or(i64::MAX);
    let amounts = plan.amounts.clone();
    let sleep_ms = plan.sleep_ms;
    let abort = plan.abort;

    let result = db
        .with_transaction(move |mut tx| {
            Box::pin(async move {
                let mut seq = 0i64;
                for amount in amounts {
                    tx.execute(
                        INSERT_ENTRY,
                        &[
                            RowValues::Int(tx_id),
                            RowValues::Int(seq),
                            RowValues::Int(amount),
                        ],
                    )
                    .await?;
                    if seq == 0 {
                        if let Some(ms) = sleep_ms {
                            tokio::time::sleep(Duration::from_millis(ms)).await;
                        }
                    }
                    seq += 1;
                }
                if abort {
                    return Err(TxPoolError::Other(format!("planned abort of tx {tx_id}")));
                }
                Ok(())
            })
        })
        .await;

    match result {
        Ok(()) => TxOutcome::Committed,
        Err(TxPoolError::Transaction(err)) => match err.disposition() {
            TxDisposition::RolledBack if err.begin_error().is_some() => {
                TxOutcome::NotStarted(err.to_string())
            }
            TxDisposition::RolledBack => TxOutcome::RolledBack,
            TxDisposition::Ambiguous => TxOutcome::Ambiguous,
        },
        Err(err) => TxOutcome::NotStarted(err.to_string()),
    }
}

#[cfg(feature = "sqlite")]
async fn stored_rows(
    db: &ConfigAndPool<sqlite_txpool::SqliteManager>,
) -> Result<HashMap<u64, usize>, String> {
    let rows = db
        .execute(ROWS_BY_TX, &[])
        .await
        .map_err(|err| format!("failed to read ledger: {err}"))?;
    let mut stored = HashMap::with_capacity(rows.results.len());
    for row in &rows.results {
        let tx = row.get("tx_id").and_then(RowValues::as_int).copied();
        let n = row.get("n").and_then(RowValues::as_int).copied();
        let (Some(tx), Some(n)) = (tx, n) else {
            return Err(format!("malformed ledger row: {row:?}"));
        };
        let tx = u64::try_from(tx).map_err(|_| format!("negative tx id {tx}"))?;
        let n = usize::try_from(n).map_err(|_| format!("negative row count {n}"))?;
        stored.insert(tx, n);
    }
    Ok(stored)
}

#[cfg(feature = "sqlite")]
async fn stored_amount(db: &ConfigAndPool<sqlite_txpool::SqliteManager>) -> Result<i64, String> {
    let rows = db
        .execute(AMOUNT_TOTAL, &[])
        .await
        .map_err(|err| format!("failed to sum ledger: {err}"))?;
    rows.first()
        .and_then(|row| row.get("total"))
        .and_then(RowValues::as_int)
        .copied()
        .ok_or_else(|| "ledger sum returned no value".to_string())
}

/// Shut the pool down and confirm it stays down.
async fn finish<M: ConnectionManager>(db: &ConfigAndPool<M>) -> Result<(), String> {
    db.shutdown().await;
    Oracle::check_shutdown(&db.status())?;
    match db.execute("SELECT 1", &[]).await {
        Err(TxPoolError::PoolShutdown) => Ok(()),
        Err(err) => Err(format!("lease after shutdown failed with {err}")),
        Ok(_) => Err("lease after shutdown succeeded".to_string()),
    }
}

#[cfg(feature = "sqlite")]
fn remove_database_files(path: &std::path::Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        let _ = std::fs::remove_file(name);
    }
}

fn report(ledger: Ledger, peak_connections: usize, elapsed: Duration) -> Report {
    Report {
        stats: ledger.stats,
        peak_connections,
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
    }
}
