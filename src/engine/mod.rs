// pstore Engine - Core module structure
pub mod config;
pub mod database;
pub mod migrations;
pub mod storage;
pub mod api;
pub mod cli;

pub use config::Config;
pub use database::Database;
pub use migrations::{MigrationRunner, SchemaVersion, VersionProbe};
pub use storage::{KvStore, StorageError};
