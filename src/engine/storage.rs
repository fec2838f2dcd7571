//! pstore Storage Module
//!
//! The five storage operations (read, write, delete, prefix scan and counter
//! increment) against the record and counter tables. Every call checks out
//! one pooled connection for its duration and runs as a single statement or
//! a single transaction, so an interrupted call never leaves partial state.
//!
//! Nothing here checks the schema version; callers run
//! [`MigrationRunner::initialize`](crate::engine::migrations::MigrationRunner::initialize)
//! first.

use rusqlite::{params, OptionalExtension, TransactionBehavior};
use std::time::Instant;
use thiserror::Error;

use crate::engine::database::{Database, DatabaseError, DbConnection};

/// Longest key or counter name the tables accept, in characters
pub const MAX_KEY_LEN: usize = 100;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{0} was not found in the store")]
    NotFound(String),

    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Database unavailable: {0}")]
    Unavailable(#[from] r2d2::Error),

    #[error("{op} failed for {key:?}: {source}")]
    Database {
        op: &'static str,
        key: String,
        #[source]
        source: rusqlite::Error,
    },
}

impl StorageError {
    /// Failures a caller may simply try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }

    fn database(op: &'static str, key: &str, source: rusqlite::Error) -> Self {
        StorageError::Database {
            op,
            key: key.to_string(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Clone)]
pub struct KvStore {
    db: Database,
}

impl KvStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Stored payload for `key`, or [`StorageError::NotFound`].
    pub fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        let started = Instant::now();
        let conn = self.conn("read", key)?;

        // key is the primary key; should several rows ever match, the first wins
        let value = conn
            .query_row(
                "SELECT value FROM records WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(|e| StorageError::database("read", key, e))?;

        tracing::debug!(key, elapsed = ?started.elapsed(), found = value.is_some(), "read");
        value.ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    /// Insert or replace the value for `key` in one statement.
    pub fn write(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        tracing::debug!(key, bytes = value.len(), "running write");

        let conn = self.conn("write", key)?;
        let result = conn.execute(
            "INSERT INTO records (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        );

        if let Err(e) = result {
            let pool = self.db.pool_state();
            tracing::warn!(
                key,
                error = %e,
                connections = pool.connections,
                idle_connections = pool.idle_connections,
                "write failed"
            );
            return Err(StorageError::database("write", key, e));
        }

        tracing::debug!(key, "completed write");
        Ok(())
    }

    /// Remove `key` if present. Absent keys are not an error.
    pub fn delete(&self, key: &str) -> StorageResult<()> {
        let conn = self.conn("delete", key)?;
        let removed = conn
            .execute("DELETE FROM records WHERE key = ?1", params![key])
            .map_err(|e| StorageError::database("delete", key, e))?;

        tracing::debug!(key, removed, "delete");
        Ok(())
    }

    /// Every key starting with `prefix`; the empty prefix lists all keys.
    ///
    /// The comparison is a literal, case-sensitive byte prefix match: `%` and
    /// `_` carry no pattern meaning. Order is unspecified.
    pub fn get_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let conn = self.conn("get_keys", prefix)?;
        let mut stmt = conn
            .prepare(
                "SELECT key FROM records
                 WHERE key >= ?1
                   AND substr(CAST(key AS BLOB), 1, length(CAST(?1 AS BLOB))) = CAST(?1 AS BLOB)",
            )
            .map_err(|e| StorageError::database("get_keys", prefix, e))?;

        let keys = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<Result<Vec<String>, _>>())
            .map_err(|e| StorageError::database("get_keys", prefix, e))?;

        tracing::debug!(prefix, count = keys.len(), "get_keys");
        Ok(keys)
    }

    /// Add one to counter `name` and return the new value. An unseen name
    /// starts at 1.
    pub fn count_increment(&self, name: &str) -> StorageResult<i64> {
        validate_key(name)?;
        let failed = |e| StorageError::database("count_increment", name, e);

        let mut conn = self.conn("count_increment", name)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(failed)?;
        let count: i64 = tx
            .query_row(
                "INSERT INTO counters (key, value) VALUES (?1, 1)
                 ON CONFLICT(key) DO UPDATE SET value = value + 1
                 RETURNING value",
                params![name],
                |row| row.get(0),
            )
            .map_err(failed)?;
        tx.commit().map_err(failed)?;

        tracing::debug!(counter = name, count, "count_increment");
        Ok(count)
    }

    fn conn(&self, op: &'static str, key: &str) -> StorageResult<DbConnection> {
        match self.db.get_connection() {
            Ok(conn) => Ok(conn),
            Err(DatabaseError::PoolError(e)) => Err(StorageError::Unavailable(e)),
            Err(DatabaseError::SqliteError(e)) => Err(StorageError::database(op, key, e)),
        }
    }
}

pub fn validate_key(key: &str) -> StorageResult<()> {
    let len = key.chars().count();
    if len > MAX_KEY_LEN {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: format!("{} characters exceeds the {} character limit", len, MAX_KEY_LEN),
        });
    }
    Ok(())
}
