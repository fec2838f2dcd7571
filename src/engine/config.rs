//! pstore Configuration Module
//! Handles loading pstore.config.json and PSTORE_* environment overrides

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "pstore.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// How long a statement waits on the SQLite write lock before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// How long a caller waits for a pooled connection before the store
    /// reports itself unavailable
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/pstore.db")
}

fn default_pool_size() -> u32 {
    10
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_connection_timeout_ms() -> u64 {
    30_000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    1024 * 1024 * 1000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path.to_path_buf()));
        }
        let content = std::fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load the config file if one is given (or present in the working
    /// directory), then apply PSTORE_* environment overrides.
    pub fn resolve(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::load(path)?,
            None => {
                let local = Path::new(CONFIG_FILE_NAME);
                if local.exists() {
                    Self::load(local)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn save(&self, config_path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("PSTORE_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(value) = lookup("PSTORE_POOL_SIZE") {
            self.database.pool_size = parse_env("PSTORE_POOL_SIZE", value)?;
        }
        if let Some(value) = lookup("PSTORE_BUSY_TIMEOUT_MS") {
            self.database.busy_timeout_ms = parse_env("PSTORE_BUSY_TIMEOUT_MS", value)?;
        }
        if let Some(value) = lookup("PSTORE_CONNECTION_TIMEOUT_MS") {
            self.database.connection_timeout_ms = parse_env("PSTORE_CONNECTION_TIMEOUT_MS", value)?;
        }
        if let Some(host) = lookup("PSTORE_HOST") {
            self.api.host = host;
        }
        if let Some(value) = lookup("PSTORE_PORT") {
            self.api.port = parse_env("PSTORE_PORT", value)?;
        }
        if let Some(value) = lookup("PSTORE_MAX_BODY_BYTES") {
            self.api.max_body_bytes = parse_env("PSTORE_MAX_BODY_BYTES", value)?;
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}
