//! SQLite adapter for the results store port.

pub mod connection;
pub mod migrations;
pub mod results_store;

pub use connection::{create_pool, create_test_pool, ConnectionError, PoolConfig};
pub use migrations::{all_embedded_migrations, Migrator};
pub use results_store::SqliteResultsStore;
