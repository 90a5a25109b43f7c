use clap::{Parser, ValueEnum};
use serde::Serialize;
use sqlite_txpool::TransactionBehavior;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
pub(crate) enum BackendKind {
    /// Real `SQLite` file in a scratch directory.
    Sqlite,
    /// In-memory scripted connections; exercises the pool without storage.
    Mock,
}

#[cfg(feature = "sqlite")]
const DEFAULT_BACKEND: &str = "sqlite";
#[cfg(not(feature = "sqlite"))]
const DEFAULT_BACKEND: &str = "mock";

#[derive(Parser, Debug)]
#[command(author, version, about = "Randomized transaction workload against sqlite-txpool")]
pub(crate) struct Args {
    #[arg(long, value_enum, default_value = DEFAULT_BACKEND)]
    pub(crate) backend: BackendKind,
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) duration: Option<Duration>,
    /// Total transactions to run across all tasks.
    #[arg(long)]
    pub(crate) transactions: Option<u64>,
    #[arg(long)]
    pub(crate) seed: Option<u64>,
    #[arg(long, default_value_t = 4)]
    pub(crate) pool_size: usize,
    #[arg(long, default_value_t = 0)]
    pub(crate) min_connections: usize,
    #[arg(long, default_value_t = 16)]
    pub(crate) tasks: usize,
    /// Chance a transaction body fails after its writes and must roll back.
    #[arg(long, default_value_t = 0.1)]
    pub(crate) abort_rate: f64,
    /// Chance a transaction pauses mid-body.
    #[arg(long, default_value_t = 0.05)]
    pub(crate) sleep_rate: f64,
    #[arg(long, default_value_t = 20)]
    pub(crate) max_sleep_ms: u64,
    /// Contended inserts injected into the mock backend.
    #[arg(long, default_value_t = 0.02)]
    pub(crate) busy_rate: f64,
    #[arg(long, default_value_t = 4)]
    pub(crate) max_inserts: u8,
    #[arg(long, value_enum, default_value = "immediate")]
    pub(crate) behavior: TransactionBehavior,
    #[arg(long)]
    pub(crate) serialize_transactions: bool,
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    /// Database file for the `sqlite` backend. Defaults to a seed-named file in the temp dir.
    #[arg(long)]
    pub(crate) db_path: Option<PathBuf>,
    #[arg(long)]
    pub(crate) quick: bool,
    #[arg(long)]
    pub(crate) stress: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimConfig {
    pub(crate) backend: BackendKind,
    pub(crate) duration_ms: Option<u64>,
    pub(crate) transactions: u64,
    pub(crate) seed: u64,
    pub(crate) pool_size: usize,
    pub(crate) min_connections: usize,
    pub(crate) tasks: usize,
    pub(crate) abort_rate: f64,
    pub(crate) sleep_rate: f64,
    pub(crate) max_sleep_ms: u64,
    pub(crate) busy_rate: f64,
    pub(crate) max_inserts: u8,
    pub(crate) behavior: TransactionBehavior,
    pub(crate) serialize_transactions: bool,
    pub(crate) log: Option<PathBuf>,
    pub(crate) db_path: Option<PathBuf>,
    pub(crate) preset: Option<String>,
    pub(crate) first_events: usize,
    pub(crate) tail_events: usize,
}

impl SimConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        let mut config = SimConfig {
            backend: args.backend,
            duration_ms: args
                .duration
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            transactions: args.transactions.unwrap_or(2_000),
            seed: args.seed.unwrap_or_else(random_seed),
            pool_size: args.pool_size.max(1),
            min_connections: args.min_connections.min(args.pool_size.max(1)),
            tasks: args.tasks.max(1),
            abort_rate: clamp_rate(args.abort_rate),
            sleep_rate: clamp_rate(args.sleep_rate),
            max_sleep_ms: args.max_sleep_ms.max(1),
            busy_rate: clamp_rate(args.busy_rate),
            max_inserts: args.max_inserts.max(1),
            behavior: args.behavior,
            serialize_transactions: args.serialize_transactions,
            log: args.log,
            db_path: args.db_path,
            preset: None,
            first_events: 30,
            tail_events: 80,
        };

        if args.quick {
            config.apply_quick();
        }
        if args.stress {
            config.apply_stress();
        }

        config
    }

    fn apply_quick(&mut self) {
        self.preset = Some("quick".to_string());
        self.transactions = 500;
        self.duration_ms = None;
        self.pool_size = 2;
        self.tasks = 8;
        self.abort_rate = 0.1;
        self.sleep_rate = 0.02;
        self.max_sleep_ms = 5;
    }

    fn apply_stress(&mut self) {
        self.preset = Some("stress".to_string());
        self.transactions = 20_000;
        self.duration_ms = None;
        self.pool_size = 8;
        self.tasks = 64;
        self.abort_rate = 0.15;
        self.sleep_rate = 0.08;
        self.busy_rate = 0.05;
        self.max_sleep_ms = 25;
    }
}

fn clamp_rate(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn random_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    now.as_secs() ^ u64::from(now.subsec_nanos())
}
