//! Database initialization and schema management

pub mod init;
pub mod migrations;

pub use init::{create_tables, init_database, init_memory_database, BUSY_TIMEOUT_MS};
pub use migrations::{run_migrations, CURRENT_SCHEMA_VERSION};
