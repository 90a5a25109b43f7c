use serde::{Deserialize, Serialize};

use crate::error::TxPoolError;
use crate::executor::RetryPolicy;
use crate::transaction::TransactionBehavior;

/// Sizing and execution policy for a [`Pool`](super::Pool). Immutable once the pool is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Connections opened by `warmup`.
    pub min_connections: usize,
    /// Hard ceiling on open physical connections.
    pub max_connections: usize,
    /// Backoff applied to busy/locked failures.
    pub retry: RetryPolicy,
    /// Locking mode used for `BEGIN`.
    pub transaction_behavior: TransactionBehavior,
    /// Admit one transaction at a time across the whole pool.
    pub serialize_transactions: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 0,
            max_connections: 4,
            retry: RetryPolicy::default(),
            transaction_behavior: TransactionBehavior::default(),
            serialize_transactions: false,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// Check the sizing invariants.
    ///
    /// # Errors
    /// Returns `TxPoolError::ConfigError` if `max_connections` is zero, below
    /// `min_connections`, or the retry policy is invalid.
    pub fn validate(&self) -> Result<(), TxPoolError> {
        if self.max_connections == 0 {
            return Err(TxPoolError::ConfigError(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(TxPoolError::ConfigError(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        self.retry.validate()
    }
}

/// Fluent builder for [`PoolConfig`].
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn min_connections(mut self, min_connections: usize) -> Self {
        self.config.min_connections = min_connections;
        self
    }

    #[must_use]
    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.config.max_connections = max_connections;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    #[must_use]
    pub fn transaction_behavior(mut self, behavior: TransactionBehavior) -> Self {
        self.config.transaction_behavior = behavior;
        self
    }

    #[must_use]
    pub fn serialize_transactions(mut self, serialize: bool) -> Self {
        self.config.serialize_transactions = serialize;
        self
    }

    /// Validate and return the finished config.
    ///
    /// # Errors
    /// Returns `TxPoolError::ConfigError` when the sizing invariants do not hold.
    pub fn build(self) -> Result<PoolConfig, TxPoolError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
