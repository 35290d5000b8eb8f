use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Runtime configuration, read once at startup from `CAMPUSD_*` environment
/// variables. There is no config file and no CLI surface; unset variables
/// fall back to defaults suitable for a local run.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket the HTTP server binds to (`CAMPUSD_ADDR`).
    pub addr: SocketAddr,
    /// Directory holding the SQLite database and backup bundles
    /// (`CAMPUSD_DATA_DIR`).
    pub data_dir: PathBuf,
    /// Bootstrap admin bearer token (`CAMPUSD_ADMIN_TOKEN`). Lets an
    /// operator reach the token-issuing endpoints on a fresh database.
    pub admin_token: Option<String>,
    /// Tracing filter (`CAMPUSD_LOG`), e.g. `campusd=debug`.
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8630)),
            data_dir: PathBuf::from("campus-data"),
            admin_token: None,
            log_filter: "campusd=info".to_string(),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let addr = match env_string("CAMPUSD_ADDR") {
            Some(raw) => raw
                .parse::<SocketAddr>()
                .with_context(|| format!("invalid CAMPUSD_ADDR '{raw}'"))?,
            None => defaults.addr,
        };
        let data_dir = env_string("CAMPUSD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let admin_token = env_string("CAMPUSD_ADMIN_TOKEN");
        let log_filter = env_string("CAMPUSD_LOG").unwrap_or(defaults.log_filter);
        Ok(Self {
            addr,
            data_dir,
            admin_token,
            log_filter,
        })
    }

    /// Path of the SQLite database file inside the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("campus.sqlite3")
    }

    /// Directory backup bundles are written into.
    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }
}
