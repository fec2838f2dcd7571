//! pstore Migrations Module
//! Walks the schema from whatever version the store is at up to the latest,
//! one transactional step at a time, using a single-row version marker.

use rusqlite::types::Value;
use rusqlite::{params, TransactionBehavior};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::engine::database::{table_exists, Database, DatabaseError};

pub const VERSION_TABLE: &str = "version";
pub const RECORDS_TABLE: &str = "records";
pub const COUNTERS_TABLE: &str = "counters";

/// Version the running binary expects the store to be at
pub const LATEST_VERSION: SchemaVersion = SchemaVersion(3);

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Version table holds {rows} rows, expected exactly one")]
    Inconsistent { rows: usize },
    #[error("Unknown schema version: {0:?}")]
    UnknownVersion(String),
    #[error("Migration to version {version} ({name}) failed: {source}")]
    StepFailed {
        version: u32,
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("SQL execution error: {0}")]
    SqlError(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SchemaVersion(pub u32);

impl SchemaVersion {
    /// No version table at all
    pub const ABSENT: SchemaVersion = SchemaVersion(0);

    fn parse(raw: &str) -> Result<Self, MigrationError> {
        match raw.trim().parse::<u32>() {
            Ok(v) if v >= 1 && v <= LATEST_VERSION.0 => Ok(SchemaVersion(v)),
            _ => Err(MigrationError::UnknownVersion(raw.to_string())),
        }
    }

    /// The marker is written as text, but a hand-made table may hold it
    /// with integer storage.
    fn from_marker(marker: &Value) -> Result<Self, MigrationError> {
        match marker {
            Value::Text(raw) => Self::parse(raw),
            Value::Integer(n) => Self::parse(&n.to_string()),
            other => Err(MigrationError::UnknownVersion(format!("{:?}", other))),
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the version table says about the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionProbe {
    Absent,
    Consistent(SchemaVersion),
    Inconsistent { rows: usize },
}

struct Step {
    to: SchemaVersion,
    name: &'static str,
    ddl: &'static str,
}

/// Ordered ladder; `STEPS[n]` moves the store from version n to n + 1.
const STEPS: &[Step] = &[
    Step {
        to: SchemaVersion(1),
        name: "create_version_table",
        ddl: "CREATE TABLE IF NOT EXISTS version (version TEXT NOT NULL);",
    },
    Step {
        to: SchemaVersion(2),
        name: "create_records_table",
        ddl: "CREATE TABLE IF NOT EXISTS records (
                key VARCHAR(100) PRIMARY KEY CHECK (length(key) <= 100),
                value BLOB NOT NULL
            );",
    },
    Step {
        to: SchemaVersion(3),
        name: "create_counters_table",
        ddl: "CREATE TABLE IF NOT EXISTS counters (
                key VARCHAR(100) PRIMARY KEY CHECK (length(key) <= 100),
                value INTEGER NOT NULL CHECK (value >= 0)
            );",
    },
];

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub current: SchemaVersion,
    pub target: SchemaVersion,
    pub pending: Vec<&'static str>,
}

impl MigrationStatus {
    pub fn is_current(&self) -> bool {
        self.pending.is_empty()
    }
}

pub struct MigrationRunner {
    db: Database,
}

impl MigrationRunner {
    pub fn new(db: &Database) -> Self {
        Self { db: db.clone() }
    }

    /// Bring the store up to [`LATEST_VERSION`]. A no-op when it is already
    /// there; any state other than a missing version table or a known
    /// version is fatal.
    pub fn initialize(&self) -> Result<SchemaVersion, MigrationError> {
        let mut current = self.current_version()?;

        while current < LATEST_VERSION {
            let step = &STEPS[current.0 as usize];
            self.apply(current, step)?;
            tracing::info!(from = %current, to = %step.to, step = step.name, "schema migrated");
            current = step.to;
        }

        tracing::debug!(version = %current, "schema is current");
        Ok(current)
    }

    /// Read the version marker without changing anything.
    pub fn probe(&self) -> Result<VersionProbe, MigrationError> {
        self.db.ping()?;
        let conn = self.db.get_connection()?;

        if !table_exists(&conn, VERSION_TABLE)? {
            return Ok(VersionProbe::Absent);
        }

        let mut stmt = conn.prepare("SELECT version FROM version")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, Value>(0))?
            .collect::<Result<Vec<Value>, _>>()?;

        match rows.as_slice() {
            [marker] => Ok(VersionProbe::Consistent(SchemaVersion::from_marker(marker)?)),
            _ => Ok(VersionProbe::Inconsistent { rows: rows.len() }),
        }
    }

    pub fn current_version(&self) -> Result<SchemaVersion, MigrationError> {
        match self.probe()? {
            VersionProbe::Absent => Ok(SchemaVersion::ABSENT),
            VersionProbe::Consistent(version) => Ok(version),
            VersionProbe::Inconsistent { rows } => Err(MigrationError::Inconsistent { rows }),
        }
    }

    pub fn status(&self) -> Result<MigrationStatus, MigrationError> {
        let current = self.current_version()?;
        let pending = STEPS
            .iter()
            .filter(|step| step.to > current)
            .map(|step| step.name)
            .collect();

        Ok(MigrationStatus {
            current,
            target: LATEST_VERSION,
            pending,
        })
    }

    /// DDL and version marker change commit together, so a failed step leaves
    /// the store at `from`.
    fn apply(&self, from: SchemaVersion, step: &Step) -> Result<(), MigrationError> {
        let mut conn = self.db.get_connection()?;
        let failed = |source| MigrationError::StepFailed {
            version: step.to.0,
            name: step.name,
            source,
        };

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(failed)?;
        tx.execute_batch(step.ddl).map_err(failed)?;

        let to = step.to.to_string();
        let marked = if from == SchemaVersion::ABSENT {
            tx.execute(
                "INSERT INTO version (version) SELECT ?1 WHERE NOT EXISTS (SELECT 1 FROM version)",
                params![to],
            )
        } else {
            tx.execute(
                "UPDATE version SET version = ?2 WHERE trim(CAST(version AS TEXT)) = ?1",
                params![from.to_string(), to],
            )
        };
        let changed = marked.map_err(failed)?;

        if changed == 0 {
            // Another process got here first; its marker stands.
            tracing::warn!(from = %from, to = %step.to, "version marker already advanced");
        }

        tx.commit().map_err(failed)?;
        Ok(())
    }
}
