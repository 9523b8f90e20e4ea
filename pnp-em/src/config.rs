//! Service configuration
//!
//! CLI flags with environment fallbacks cover the operational knobs; secret
//! material (the payload decryption key) and the storage bypass used by
//! tests come from the environment only.

use clap::Parser;
use pnp_common::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the base64-encoded 32-byte AES key
pub const DECRYPTION_KEY_ENV: &str = "PNP_DECRYPTION_KEY";

/// "true" disables all storage writes (test hook)
pub const BYPASS_STORAGE_ENV: &str = "BYPASS_LOCAL_STORAGE";

/// Command-line arguments for pnp-em
#[derive(Parser, Debug)]
#[command(name = "pnp-em")]
#[command(about = "Event materializer for the PnP operational data store")]
#[command(version)]
pub struct Args {
    /// Path to the SQLite database file
    #[arg(long, env = "PNP_DB_PATH", default_value = "pnp.db")]
    pub db_path: PathBuf,

    /// Number of pipeline workers
    #[arg(long, env = "PNP_WORKERS", default_value = "4")]
    pub workers: usize,

    /// Base URL of the external service catalog
    #[arg(long, env = "PNP_CATALOG_URL", default_value = "http://localhost:8500/catalog")]
    pub catalog_url: String,

    /// Catalog cache refresh interval in seconds
    #[arg(long, env = "PNP_CATALOG_REFRESH_SECS", default_value = "3600")]
    pub catalog_refresh_secs: u64,

    /// Comma-separated cnames allowed outside the public cloud
    #[arg(long, env = "PNP_ALLOWED_CNAMES", default_value = "")]
    pub allowed_cnames: String,

    /// Capacity of the bounded notification channel
    #[arg(long, env = "PNP_NOTIFICATION_CAPACITY", default_value = "256")]
    pub notification_capacity: usize,

    /// Capacity of the inbound message channel
    #[arg(long, env = "PNP_INBOUND_CAPACITY", default_value = "64")]
    pub inbound_capacity: usize,
}

/// Resolved runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub workers: usize,
    pub catalog_url: String,
    pub catalog_refresh: Duration,
    pub allowed_cnames: Vec<String>,
    pub notification_capacity: usize,
    pub inbound_capacity: usize,
    /// Fixed backoff between attempts for transient failures
    pub retry_backoff: Duration,
    /// Deadline applied to every storage operation
    pub db_deadline: Duration,
    /// Grace period for draining in-flight messages at shutdown
    pub shutdown_grace: Duration,
    pub bypass_local_storage: bool,
    /// Base64-encoded 32-byte AES key
    pub decryption_key: String,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Config> {
        if args.workers == 0 {
            return Err(Error::Config("worker count must be at least 1".into()));
        }

        let decryption_key = std::env::var(DECRYPTION_KEY_ENV).map_err(|_| {
            Error::Config(format!("{DECRYPTION_KEY_ENV} must be set (base64, 32 bytes)"))
        })?;

        let bypass_local_storage = std::env::var(BYPASS_STORAGE_ENV)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let allowed_cnames = args
            .allowed_cnames
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            db_path: args.db_path,
            workers: args.workers,
            catalog_url: args.catalog_url,
            catalog_refresh: Duration::from_secs(args.catalog_refresh_secs),
            allowed_cnames,
            notification_capacity: args.notification_capacity,
            inbound_capacity: args.inbound_capacity,
            retry_backoff: Duration::from_secs(5),
            db_deadline: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            bypass_local_storage,
            decryption_key,
        })
    }
}
