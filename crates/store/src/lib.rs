//! Courier Store Crate
//!
//! SQLite-backed implementation of the relay's persistence collaborator,
//! including connection management and embedded migrations.

pub mod connection;
pub mod error;
pub mod migrations;
pub mod sqlite_store;

pub use connection::prepare_database;
pub use error::{StoreError, StoreResult};
pub use migrations::run_migrations;
pub use sqlite_store::SqliteStore;
