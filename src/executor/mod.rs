mod policy;
mod retry;

pub use policy::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, RetryPolicy};
pub use retry::{execute_with_retry, execute_with_retry_cancellable};
