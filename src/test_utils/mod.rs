//! Test doubles for exercising the pool and executors without a real database.

mod mock;
mod test_helpers;

pub use mock::{ExecutedStatement, MockConnection, MockManager};
pub use test_helpers::create_result_set;
