//! pstore CLI Module
//! Command-line interface for running and operating a pstore database

pub mod formatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pstore")]
#[command(author = "pstore Team")]
#[command(version)]
#[command(about = "SQLite-backed key-value and counter service", long_about = None)]
pub struct Cli {
    /// Config file (defaults to ./pstore.config.json when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file, overriding config and PSTORE_DB_PATH
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Migrate the database and start the API server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },

    /// Schema migration commands
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Show database status
    Status,

    /// Print the value stored under a key
    Read {
        key: String,

        /// Write the raw bytes to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Store a value under a key
    Write {
        key: String,

        /// Value as a UTF-8 string
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        value: Option<String>,

        /// Read the value from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// List keys starting with a prefix
    Keys {
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Delete a key
    Delete { key: String },

    /// Increment a counter and print its new value
    Count { name: String },
}

#[derive(Subcommand, Debug)]
pub enum MigrateAction {
    /// Apply pending schema steps
    Run,

    /// Report the schema version and pending steps
    Check,
}
