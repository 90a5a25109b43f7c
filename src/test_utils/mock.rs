use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::TxPoolError;
use crate::manager::{AsyncDatabaseExecutor, ConnectionManager};
use crate::results::ResultSet;
use crate::types::RowValues;

/// One statement seen by a [`MockConnection`].
#[derive(Debug, Clone)]
pub struct ExecutedStatement {
    pub connection_id: u64,
    pub statement: String,
    pub params: Vec<RowValues>,
    pub at: Instant,
}

#[derive(Debug, Clone)]
enum Reply {
    Busy,
    Fail,
    Rows(ResultSet),
}

#[derive(Debug)]
struct Rule {
    prefix: String,
    reply: Reply,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct OpenScript {
    allow: usize,
    fail: usize,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: AtomicU64,
    opened: AtomicUsize,
    closed: AtomicUsize,
    peak_live: AtomicUsize,
    fail_closes: AtomicBool,
    open_script: Mutex<OpenScript>,
    open_delay: Mutex<Duration>,
    statement_delay: Mutex<Duration>,
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<ExecutedStatement>>,
    live: Mutex<HashSet<u64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scriptable connection primitive.
///
/// Statements are matched against rules by prefix, in the order the rules were added; the
/// first rule with budget left decides the reply. Unmatched statements succeed with an
/// empty result.
#[derive(Clone, Default)]
pub struct MockManager {
    state: Arc<MockState>,
}

impl fmt::Debug for MockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockManager")
            .field("opened", &self.opened())
            .field("closed", &self.closed())
            .finish_non_exhaustive()
    }
}

impl MockManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` opens fail.
    pub fn fail_next_opens(&self, n: usize) {
        *lock(&self.state.open_script) = OpenScript { allow: 0, fail: n };
    }

    /// Let `allowed` more opens succeed, then fail every open after that.
    pub fn fail_opens_after(&self, allowed: usize) {
        *lock(&self.state.open_script) = OpenScript {
            allow: allowed,
            fail: usize::MAX,
        };
    }

    pub fn fail_closes(&self, fail: bool) {
        self.state.fail_closes.store(fail, Ordering::SeqCst);
    }

    pub fn open_delay(&self, delay: Duration) {
        *lock(&self.state.open_delay) = delay;
    }

    pub fn statement_delay(&self, delay: Duration) {
        *lock(&self.state.statement_delay) = delay;
    }

    /// Statements starting with `prefix` report contention, `times` times or forever.
    pub fn busy_on(&self, prefix: &str, times: Option<usize>) {
        self.push_rule(prefix, Reply::Busy, times);
    }

    /// Statements starting with `prefix` fail with a non-transient error.
    pub fn fail_on(&self, prefix: &str, times: Option<usize>) {
        self.push_rule(prefix, Reply::Fail, times);
    }

    /// Statements starting with `prefix` return `rows`.
    pub fn respond_with(&self, prefix: &str, rows: ResultSet) {
        self.push_rule(prefix, Reply::Rows(rows), None);
    }

    fn push_rule(&self, prefix: &str, reply: Reply, remaining: Option<usize>) {
        lock(&self.state.rules).push(Rule {
            prefix: prefix.to_string(),
            reply,
            remaining,
        });
    }

    #[must_use]
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed.
    #[must_use]
    pub fn live(&self) -> usize {
        lock(&self.state.live).len()
    }

    /// Highest number of simultaneously live connections seen.
    #[must_use]
    pub fn peak_live(&self) -> usize {
        self.state.peak_live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        lock(&self.state.log).clone()
    }

    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        lock(&self.state.log)
            .iter()
            .map(|entry| entry.statement.clone())
            .collect()
    }

    fn next_open_fails(&self) -> bool {
        let mut script = lock(&self.state.open_script);
        if script.fail == 0 {
            return false;
        }
        if script.allow > 0 {
            script.allow -= 1;
            return false;
        }
        if script.fail != usize::MAX {
            script.fail -= 1;
        }
        true
    }
}

#[async_trait]
impl ConnectionManager for MockManager {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection, TxPoolError> {
        let delay = *lock(&self.state.open_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.next_open_fails() {
            return Err(TxPoolError::ConnectionError("mock open failure".into()));
        }
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        let live = {
            let mut live = lock(&self.state.live);
            live.insert(id);
            live.len()
        };
        self.state.peak_live.fetch_max(live, Ordering::SeqCst);
        Ok(MockConnection {
            id,
            state: Arc::clone(&self.state),
        })
    }

    async fn close(&self, conn: MockConnection) -> Result<(), TxPoolError> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.live).remove(&conn.id);
        if self.state.fail_closes.load(Ordering::SeqCst) {
            return Err(TxPoolError::ConnectionError("mock close failure".into()));
        }
        Ok(())
    }
}

/// Connection produced by [`MockManager`].
#[derive(Debug)]
pub struct MockConnection {
    id: u64,
    state: Arc<MockState>,
}

impl MockConnection {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    fn reply_for(&self, statement: &str) -> Option<Reply> {
        let mut rules = lock(&self.state.rules);
        let rule = rules.iter_mut().find(|rule| {
            statement.starts_with(rule.prefix.as_str()) && rule.remaining != Some(0)
        })?;
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.reply.clone())
    }
}

#[async_trait]
impl AsyncDatabaseExecutor for MockConnection {
    async fn execute(
        &mut self,
        statement: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, TxPoolError> {
        let delay = *lock(&self.state.statement_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        lock(&self.state.log).push(ExecutedStatement {
            connection_id: self.id,
            statement: statement.to_string(),
            params: params.to_vec(),
            at: Instant::now(),
        });
        match self.reply_for(statement) {
            None => Ok(ResultSet::default()),
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Busy) => Err(TxPoolError::Busy(format!("mock busy: {statement}"))),
            Some(Reply::Fail) => Err(TxPoolError::ExecutionError(format!(
                "mock failure: {statement}"
            ))),
        }
    }
}
