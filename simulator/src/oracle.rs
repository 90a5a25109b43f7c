use std::collections::HashMap;

use sqlite_txpool::PoolStatus;

use crate::model::Ledger;

/// Statement counts observed on the mock backend after a run.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct MockCounts {
    pub(crate) commits: u64,
    pub(crate) rollbacks: u64,
    pub(crate) peak_live: usize,
    pub(crate) live_after_shutdown: usize,
    pub(crate) opened: usize,
    pub(crate) closed: usize,
}

pub(crate) struct Oracle;

impl Oracle {
    /// The pool never counted more connections than its ceiling.
    pub(crate) fn check_ceiling(peak_total: usize, max_connections: usize) -> Result<(), String> {
        if peak_total > max_connections {
            return Err(format!(
                "pool held {peak_total} connections with a ceiling of {max_connections}"
            ));
        }
        Ok(())
    }

    /// With every worker finished, all connections are parked and nobody is queued.
    pub(crate) fn check_quiescent(status: &PoolStatus) -> Result<(), String> {
        if status.waiters != 0 {
            return Err(format!("{} waiter(s) left queued after the run", status.waiters));
        }
        if status.total_connections != status.idle_connections {
            return Err(format!(
                "{} connection(s) counted but only {} idle after the run",
                status.total_connections, status.idle_connections
            ));
        }
        Ok(())
    }

    pub(crate) fn check_shutdown(status: &PoolStatus) -> Result<(), String> {
        if !status.is_shutdown {
            return Err("pool does not report shutdown".to_string());
        }
        if status.total_connections != 0 || status.idle_connections != 0 {
            return Err(format!(
                "shutdown left {} connection(s) counted, {} idle",
                status.total_connections, status.idle_connections
            ));
        }
        Ok(())
    }

    /// Every committed transaction left all of its rows, and nothing else is visible
    /// except possibly the complete row set of an ambiguous transaction.
    pub(crate) fn check_rows(ledger: &Ledger, stored: &HashMap<u64, usize>) -> Result<(), String> {
        for (tx, expected) in &ledger.committed {
            match stored.get(tx) {
                Some(found) if found == expected => {}
                Some(found) => {
                    return Err(format!(
                        "committed tx {tx} has {found} row(s), expected {expected}"
                    ));
                }
                None => return Err(format!("committed tx {tx} left no rows")),
            }
        }
        for (tx, found) in stored {
            if ledger.committed.contains_key(tx) {
                continue;
            }
            if ledger.rolled_back.contains(tx) {
                return Err(format!("rolled back tx {tx} left {found} row(s)"));
            }
            match ledger.ambiguous.get(tx) {
                Some(expected) if expected == found => {}
                Some(expected) => {
                    return Err(format!(
                        "ambiguous tx {tx} was partially applied: {found} of {expected} row(s)"
                    ));
                }
                None => return Err(format!("unknown tx {tx} left {found} row(s)")),
            }
        }
        Ok(())
    }

    pub(crate) fn check_mock(
        ledger: &Ledger,
        counts: &MockCounts,
        max_connections: usize,
    ) -> Result<(), String> {
        let stats = &ledger.stats;
        if counts.peak_live > max_connections {
            return Err(format!(
                "{} mock connections were live at once with a ceiling of {max_connections}",
                counts.peak_live
            ));
        }
        if counts.live_after_shutdown != 0 || counts.opened != counts.closed {
            return Err(format!(
                "shutdown leaked connections: {} live, {} opened, {} closed",
                counts.live_after_shutdown, counts.opened, counts.closed
            ));
        }
        if counts.commits < stats.committed || counts.commits > stats.committed + stats.ambiguous {
            return Err(format!(
                "{} COMMIT statement(s) for {} committed and {} ambiguous transaction(s)",
                counts.commits, stats.committed, stats.ambiguous
            ));
        }
        let rolled_back = stats.planned_aborts + stats.unplanned_rollbacks;
        if counts.rollbacks < rolled_back || counts.rollbacks > rolled_back + stats.ambiguous {
            return Err(format!(
                "{} ROLLBACK statement(s) for {rolled_back} rolled back transaction(s)",
                counts.rollbacks
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TxOutcome;
    use crate::plan::TxPlan;

    fn plan(id: u64, rows: usize) -> TxPlan {
        TxPlan {
            id,
            worker: 0,
            amounts: vec![1; rows],
            sleep_ms: None,
            abort: false,
        }
    }

    #[test]
    fn rows_must_match_outcomes() {
        let mut ledger = Ledger::default();
        ledger.record(&plan(1, 2), &TxOutcome::Committed);
        ledger.record(&plan(2, 3), &TxOutcome::RolledBack);
        ledger.record(&plan(3, 2), &TxOutcome::Ambiguous);

        let mut stored = HashMap::from([(1, 2)]);
        assert!(Oracle::check_rows(&ledger, &stored).is_ok());

        stored.insert(3, 2);
        assert!(Oracle::check_rows(&ledger, &stored).is_ok());

        stored.insert(3, 1);
        assert!(Oracle::check_rows(&ledger, &stored).is_err());

        stored.remove(&3);
        stored.insert(2, 3);
        assert!(Oracle::check_rows(&ledger, &stored).is_err());

        let missing = HashMap::new();
        assert!(Oracle::check_rows(&ledger, &missing).is_err());
    }

    #[test]
    fn ceiling_and_quiescence() {
        assert!(Oracle::check_ceiling(4, 4).is_ok());
        assert!(Oracle::check_ceiling(5, 4).is_err());

        let idle = PoolStatus {
            total_connections: 2,
            idle_connections: 2,
            waiters: 0,
            is_shutdown: false,
        };
        assert!(Oracle::check_quiescent(&idle).is_ok());
        assert!(Oracle::check_shutdown(&idle).is_err());

        let leaked = PoolStatus {
            idle_connections: 1,
            ..idle
        };
        assert!(Oracle::check_quiescent(&leaked).is_err());
    }
}
