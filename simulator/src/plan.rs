use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::args::SimConfig;

/// One randomly generated transaction: the ledger rows it writes and how it misbehaves.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct TxPlan {
    pub(crate) id: u64,
    pub(crate) worker: usize,
    pub(crate) amounts: Vec<i64>,
    /// Pause after the first write, holding the connection and any write lock.
    pub(crate) sleep_ms: Option<u64>,
    /// Fail the body after all writes so the transaction must roll back.
    pub(crate) abort: bool,
}

impl TxPlan {
    pub(crate) fn generate(rng: &mut ChaCha8Rng, config: &SimConfig, id: u64, worker: usize) -> Self {
        let inserts = rng.random_range(1..=config.max_inserts);
        let amounts = (0..inserts).map(|_| rng.random_range(-500..=500)).collect();
        let sleep_ms = rng
            .random_bool(config.sleep_rate)
            .then(|| rng.random_range(1..=config.max_sleep_ms));
        let abort = rng.random_bool(config.abort_rate);
        Self {
            id,
            worker,
            amounts,
            sleep_ms,
            abort,
        }
    }

    pub(crate) fn describe(&self) -> String {
        let mut text = format!(
            "tx {} (worker {}): {} insert(s)",
            self.id,
            self.worker,
            self.amounts.len()
        );
        if let Some(ms) = self.sleep_ms {
            text.push_str(&format!(", sleep {ms}ms"));
        }
        if self.abort {
            text.push_str(", abort");
        }
        text
    }
}

/// Split `total` transactions across `workers` as evenly as possible.
pub(crate) fn share_of(total: u64, workers: usize, worker: usize) -> u64 {
    let workers = workers.max(1) as u64;
    let worker = worker as u64;
    total / workers + u64::from(worker < total % workers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{Args, SimConfig};
    use clap::Parser;
    use rand::SeedableRng;

    fn config() -> SimConfig {
        SimConfig::from_args(Args::parse_from([
            "simulator",
            "--backend",
            "mock",
            "--seed",
            "11",
            "--max-inserts",
            "3",
        ]))
    }

    #[test]
    fn shares_cover_total() {
        let total: u64 = (0..7).map(|w| share_of(100, 7, w)).sum();
        assert_eq!(total, 100);
        assert_eq!(share_of(3, 5, 4), 0);
        assert_eq!(share_of(3, 5, 0), 1);
    }

    #[test]
    fn same_seed_same_plans() {
        let config = config();
        let mut a = ChaCha8Rng::seed_from_u64(config.seed);
        let mut b = ChaCha8Rng::seed_from_u64(config.seed);
        for id in 0..50 {
            let left = TxPlan::generate(&mut a, &config, id, 0);
            let right = TxPlan::generate(&mut b, &config, id, 0);
            assert_eq!(left.amounts, right.amounts);
            assert_eq!(left.sleep_ms, right.sleep_ms);
            assert_eq!(left.abort, right.abort);
            assert!((1..=3).contains(&left.amounts.len()));
        }
    }
}
