//! pstore - SQLite-backed key-value and counter service
//!
//! Opening a store is two steps: build a [`Database`](engine::Database) pool,
//! then run [`MigrationRunner::initialize`](engine::MigrationRunner::initialize)
//! before handing the pool to a [`KvStore`](engine::KvStore).

pub mod engine;
