use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::plan::TxPlan;

/// How one planned transaction ended, as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TxOutcome {
    Committed,
    RolledBack,
    /// `COMMIT` (or a rollback after a body failure) failed; the rows may or may not exist.
    Ambiguous,
    /// The transaction never started, e.g. a lease failure.
    NotStarted(String),
}

/// Expected store contents, built from the outcomes the workers observed.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    /// tx id -> rows it wrote, for committed transactions.
    pub(crate) committed: HashMap<u64, usize>,
    pub(crate) rolled_back: HashSet<u64>,
    pub(crate) ambiguous: HashMap<u64, usize>,
    pub(crate) stats: LedgerStats,
}

#[derive(Debug, Default, Clone, Serialize)]
pub(crate) struct LedgerStats {
    pub(crate) committed: u64,
    pub(crate) planned_aborts: u64,
    pub(crate) unplanned_rollbacks: u64,
    pub(crate) ambiguous: u64,
    pub(crate) not_started: u64,
    pub(crate) committed_rows: u64,
    pub(crate) committed_amount: i64,
}

impl Ledger {
    pub(crate) fn record(&mut self, plan: &TxPlan, outcome: &TxOutcome) {
        match outcome {
            TxOutcome::Committed => {
                self.committed.insert(plan.id, plan.amounts.len());
                self.stats.committed += 1;
                self.stats.committed_rows += plan.amounts.len() as u64;
                self.stats.committed_amount += plan.amounts.iter().sum::<i64>();
            }
            TxOutcome::RolledBack => {
                self.rolled_back.insert(plan.id);
                if plan.abort {
                    self.stats.planned_aborts += 1;
                } else {
                    self.stats.unplanned_rollbacks += 1;
                }
            }
            TxOutcome::Ambiguous => {
                self.ambiguous.insert(plan.id, plan.amounts.len());
                self.stats.ambiguous += 1;
            }
            TxOutcome::NotStarted(_) => {
                self.rolled_back.insert(plan.id);
                self.stats.not_started += 1;
            }
        }
    }

    pub(crate) fn merge(&mut self, other: Ledger) {
        self.committed.extend(other.committed);
        self.rolled_back.extend(other.rolled_back);
        self.ambiguous.extend(other.ambiguous);
        let stats = other.stats;
        self.stats.committed += stats.committed;
        self.stats.planned_aborts += stats.planned_aborts;
        self.stats.unplanned_rollbacks += stats.unplanned_rollbacks;
        self.stats.ambiguous += stats.ambiguous;
        self.stats.not_started += stats.not_started;
        self.stats.committed_rows += stats.committed_rows;
        self.stats.committed_amount += stats.committed_amount;
    }

    pub(crate) fn finished(&self) -> u64 {
        self.stats.committed
            + self.stats.planned_aborts
            + self.stats.unplanned_rollbacks
            + self.stats.ambiguous
            + self.stats.not_started
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(id: u64, amounts: Vec<i64>, abort: bool) -> TxPlan {
        TxPlan {
            id,
            worker: 0,
            amounts,
            sleep_ms: None,
            abort,
        }
    }

    #[test]
    fn outcomes_land_in_the_right_buckets() {
        let mut left = Ledger::default();
        left.record(&plan(1, vec![5, 7], false), &TxOutcome::Committed);
        left.record(&plan(2, vec![1], true), &TxOutcome::RolledBack);

        let mut right = Ledger::default();
        right.record(&plan(3, vec![2], false), &TxOutcome::RolledBack);
        right.record(&plan(4, vec![9, 9, 9], false), &TxOutcome::Ambiguous);
        right.record(&plan(5, vec![1], false), &TxOutcome::NotStarted("shutdown".into()));

        left.merge(right);
        assert_eq!(left.finished(), 5);
        assert_eq!(left.stats.committed_rows, 2);
        assert_eq!(left.stats.committed_amount, 12);
        assert_eq!(left.stats.planned_aborts, 1);
        assert_eq!(left.stats.unplanned_rollbacks, 1);
        assert_eq!(left.ambiguous.get(&4), Some(&3));
        assert!(left.rolled_back.contains(&5));
    }
}
