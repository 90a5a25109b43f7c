use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TxPoolError;

/// Attempts made for one statement before a busy error is surfaced.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;
/// Delay after the first busy failure; doubles on every further failure.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(25);
/// Ceiling for a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(1000);

/// Bounded exponential backoff applied to busy/locked failures.
///
/// The delay after failed attempt `n` (1-based) is `min(max_delay, base_delay << (n - 1))`,
/// which with the defaults gives 25, 50, 100, 200, 400, 800, 1000, 1000 ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Run every statement exactly once.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Backoff to apply after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// The full backoff schedule, one entry per attempt.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).map(|attempt| self.delay_for_attempt(attempt))
    }

    pub(crate) fn validate(&self) -> Result<(), TxPoolError> {
        if self.max_attempts == 0 {
            return Err(TxPoolError::ConfigError(
                "retry policy needs at least one attempt".into(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(TxPoolError::ConfigError(format!(
                "retry base delay {:?} exceeds max delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }
}
