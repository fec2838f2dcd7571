//! pstore CLI - Main entry point
//!
//! Runs the API server and exposes the storage operations from the shell.

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::Parser;
use pstore_lib::engine::{
    api::{create_router, ApiState},
    cli::formatter::{format_payload, format_size, CliFormatter},
    cli::{Cli, Commands, MigrateAction, OutputFormat},
    config::Config,
    database::Database,
    migrations::{MigrationRunner, COUNTERS_TABLE, RECORDS_TABLE},
    storage::KvStore,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_logging();

    if let Err(e) = run_cli(cli) {
        CliFormatter::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::resolve(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    let json = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.api.port = port;
            }
            if let Some(host) = host {
                config.api.host = host;
            }
            cmd_serve(config)?;
        }
        Commands::Migrate { action } => cmd_migrate(&config, action, json)?,
        Commands::Status => cmd_status(&config, json)?,
        Commands::Read { key, output } => cmd_read(&config, &key, output, json)?,
        Commands::Write { key, value, file } => cmd_write(&config, &key, value, file, json)?,
        Commands::Keys { prefix } => cmd_keys(&config, &prefix, json)?,
        Commands::Delete { key } => {
            open_store(&config)?.delete(&key)?;
            if json {
                println!("{}", serde_json::json!({ "deleted": key }));
            } else {
                CliFormatter::success(&format!("Deleted {}", key));
            }
        }
        Commands::Count { name } => {
            let count = open_store(&config)?.count_increment(&name)?;
            if json {
                println!("{}", serde_json::json!({ "counter": name, "count": count }));
            } else {
                println!("{}", count);
            }
        }
    }

    Ok(())
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
    let path = &config.database.path;
    let db = Database::new(path, &config.database)
        .with_context(|| format!("unable to open database {}", path.display()))?;
    db.ping()
        .with_context(|| format!("unable to reach database {}", path.display()))?;
    Ok(db)
}

/// Storage operations only run against a fully migrated schema.
fn open_store(config: &Config) -> anyhow::Result<KvStore> {
    let db = open_database(config)?;
    MigrationRunner::new(&db)
        .initialize()
        .context("unable to init the db")?;
    Ok(KvStore::new(db))
}

#[tokio::main]
async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let state = ApiState::new(store, config.api.max_body_bytes);
    let app = create_router(state);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("pstore failed to listen on {}", addr))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        db = %config.database.path.display(),
        "pstore is listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("pstore stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn cmd_migrate(config: &Config, action: MigrateAction, json: bool) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let runner = MigrationRunner::new(&db);

    match action {
        MigrateAction::Run => {
            let before = runner.status()?;
            let version = runner.initialize()?;
            if json {
                println!("{}", serde_json::json!({
                    "from": before.current,
                    "to": version,
                    "applied": before.pending,
                }));
            } else if before.is_current() {
                CliFormatter::info(&format!("Schema already at version {}", version));
            } else {
                CliFormatter::success(&format!(
                    "Migrated schema from version {} to {}",
                    before.current, version
                ));
                for name in &before.pending {
                    CliFormatter::item(name);
                }
            }
        }
        MigrateAction::Check => {
            let status = runner.status()?;
            if json {
                println!("{}", serde_json::to_string(&status)?);
            } else {
                CliFormatter::kv("Current version", &status.current.to_string());
                CliFormatter::kv("Target version", &status.target.to_string());
                if status.is_current() {
                    CliFormatter::success("Schema is up to date");
                } else {
                    CliFormatter::warning(&format!("{} pending step(s)", status.pending.len()));
                    for name in &status.pending {
                        CliFormatter::item(name);
                    }
                }
            }
        }
    }

    Ok(())
}

fn cmd_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let status = MigrationRunner::new(&db).status()?;
    let size = std::fs::metadata(db.path()).map(|m| m.len()).unwrap_or(0);

    let count_if_present = |table: &str| -> anyhow::Result<Option<u64>> {
        if db.table_exists(table)? {
            Ok(Some(db.count_rows(table)?))
        } else {
            Ok(None)
        }
    };
    let records = count_if_present(RECORDS_TABLE)?;
    let counters = count_if_present(COUNTERS_TABLE)?;

    if json {
        println!("{}", serde_json::json!({
            "database": db.path().display().to_string(),
            "size_bytes": size,
            "schema_version": status.current,
            "target_version": status.target,
            "records": records,
            "counters": counters,
        }));
    } else {
        let shown = |count: Option<u64>| count.map_or("(no table)".to_string(), |c| c.to_string());
        CliFormatter::header("pstore Status");
        CliFormatter::kv("Database", &db.path().display().to_string());
        CliFormatter::kv("Size", &format_size(size));
        CliFormatter::kv("Schema", &format!("{} of {}", status.current, status.target));
        CliFormatter::kv("Records", &shown(records));
        CliFormatter::kv("Counters", &shown(counters));
        if !status.is_current() {
            CliFormatter::warning("Schema is behind; run `pstore migrate run`");
        }
    }

    Ok(())
}

fn cmd_read(config: &Config, key: &str, output: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let value = open_store(config)?.read(key)?;

    if let Some(path) = output {
        std::fs::write(&path, &value)
            .with_context(|| format!("unable to write {}", path.display()))?;
        if !json {
            CliFormatter::success(&format!("Wrote {} to {}", format_size(value.len() as u64), path.display()));
        }
    } else if json {
        println!("{}", serde_json::json!({ "key": key, "value": STANDARD.encode(&value) }));
    } else {
        println!("{}", format_payload(&value));
    }

    Ok(())
}

fn cmd_write(
    config: &Config,
    key: &str,
    value: Option<String>,
    file: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let bytes = match (value, file) {
        (Some(value), _) => value.into_bytes(),
        (None, Some(path)) => std::fs::read(&path)
            .with_context(|| format!("unable to read {}", path.display()))?,
        (None, None) => anyhow::bail!("a value or --file is required"),
    };

    open_store(config)?.write(key, &bytes)?;
    if json {
        println!("{}", serde_json::json!({ "key": key, "bytes": bytes.len() }));
    } else {
        CliFormatter::success(&format!("Stored {} under {}", format_size(bytes.len() as u64), key));
    }

    Ok(())
}

fn cmd_keys(config: &Config, prefix: &str, json: bool) -> anyhow::Result<()> {
    let mut keys = open_store(config)?.get_keys(prefix)?;
    keys.sort();

    if json {
        println!("{}", serde_json::json!({ "keys": keys }));
    } else {
        for key in &keys {
            println!("{}", key);
        }
    }

    Ok(())
}
