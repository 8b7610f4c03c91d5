//! SQLite persistence for the approval workflow engine: connection pool
//! setup, migrations, repositories, and the durable sequence counter.

pub mod connection;
pub mod counter;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_from_config, connect_with_settings, DbPool};
pub use counter::SqlSequenceCounterStore;
