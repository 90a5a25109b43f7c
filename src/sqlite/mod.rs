// SQLite connection primitive
//
// - config: options, builder, and the `ConfigAndPool` constructors
// - manager: opens/closes connections for the pool
// - connection: statement execution on the blocking pool
// - params / query: value conversion in and out of rusqlite

pub mod config;
pub mod connection;
pub mod manager;
pub mod params;
pub mod query;

pub use config::{SqliteOptions, SqliteOptionsBuilder};
pub use connection::SqliteConnection;
pub use manager::SqliteManager;
pub use params::Params;
pub use query::build_result_set;
