//! pstore Database Module
//! SQLite handle with connection pooling

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::config::DatabaseConfig;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database unavailable: {0}")]
    PoolError(#[from] r2d2::Error),
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
}

/// Snapshot of the pool, logged when a write fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    pub connections: u32,
    pub idle_connections: u32,
}

#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    path: PathBuf,
}

impl Database {
    pub fn new(db_path: &Path, config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(db_path)
            .with_init(move |conn| init_connection(conn, busy_timeout));
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .connection_timeout(connection_timeout(config))
            .build(manager)?;

        tracing::debug!(path = %db_path.display(), pool_size = config.pool_size, "opened database pool");
        Ok(Self {
            pool,
            path: db_path.to_path_buf(),
        })
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Self::in_memory_with(&DatabaseConfig::default())
    }

    /// Every pooled connection to `:memory:` is its own database, so the pool
    /// holds exactly one and `pool_size` is ignored.
    pub fn in_memory_with(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager = SqliteConnectionManager::memory()
            .with_init(move |conn| init_connection(conn, busy_timeout));
        let pool = Pool::builder()
            .max_size(1)
            .connection_timeout(connection_timeout(config))
            .build(manager)?;
        Ok(Self {
            pool,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_connection(&self) -> Result<DbConnection, DatabaseError> {
        Ok(self.pool.get()?)
    }

    /// Round-trip a trivial statement to prove the store is reachable.
    pub fn ping(&self) -> Result<(), DatabaseError> {
        let conn = self.get_connection()?;
        let _: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(())
    }

    pub fn pool_state(&self) -> PoolState {
        let state = self.pool.state();
        PoolState {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }

    pub fn table_exists(&self, name: &str) -> Result<bool, DatabaseError> {
        let conn = self.get_connection()?;
        Ok(table_exists(&conn, name)?)
    }

    pub fn count_rows(&self, table: &str) -> Result<u64, DatabaseError> {
        let conn = self.get_connection()?;
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }
}

/// Catalog lookup used instead of matching "no such table" error text.
pub fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![name],
        |row| row.get(0),
    )
}

// r2d2 rejects a zero timeout
fn connection_timeout(config: &DatabaseConfig) -> Duration {
    Duration::from_millis(config.connection_timeout_ms.max(1))
}

fn init_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    // PRAGMA journal_mode returns the resulting mode as a row
    let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    Ok(())
}
