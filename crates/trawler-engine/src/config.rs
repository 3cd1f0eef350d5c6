//! Engine configuration
//!
//! All tunables are explicit struct fields threaded through the driver and
//! pool constructors; there is no global mutable state.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use trawler_common::{Result, TrawlError};

/// Maximum number of files staged for transfer in one cycle.
pub const DEFAULT_MAX_TRANSFERS: usize = 5000;

/// Worker tasks per available CPU. Uploads are I/O-bound, so the pool
/// oversubscribes well beyond the core count.
pub const DEFAULT_WORKER_MULTIPLIER: usize = 10;

/// Sleep between cycles when nothing was uploaded, and between reconnect
/// probes.
pub const DEFAULT_SLEEP_SECS: u64 = 20;

/// Time budget for one product's discovery walk.
pub const DEFAULT_DISCOVER_TIMEOUT_SECS: u64 = 10;

/// Trawl engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrawlConfig {
    /// Top-level directory polled each cycle for product subdirectories
    pub trawl_root: PathBuf,

    /// Quarantine destination for failed products; defaults to the trawl
    /// root's sibling `failed` directory
    pub failed_root: PathBuf,

    /// Cap on files staged for transfer per cycle
    pub max_transfers: usize,

    /// Worker tasks per available CPU
    pub worker_multiplier: usize,

    /// Idle-cycle sleep interval
    pub sleep_interval: Duration,

    /// Per-product discovery time budget
    pub discover_timeout: Duration,
}

impl TrawlConfig {
    /// Config with default tunables for the given trawl root.
    pub fn new(trawl_root: impl Into<PathBuf>) -> Self {
        let trawl_root = trawl_root.into();
        let failed_root = default_failed_root(&trawl_root);
        Self {
            trawl_root,
            failed_root,
            max_transfers: DEFAULT_MAX_TRANSFERS,
            worker_multiplier: DEFAULT_WORKER_MULTIPLIER,
            sleep_interval: Duration::from_secs(DEFAULT_SLEEP_SECS),
            discover_timeout: Duration::from_secs(DEFAULT_DISCOVER_TIMEOUT_SECS),
        }
    }

    /// Load tunables from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `TRAWLER_MAX_TRANSFERS`
    /// - `TRAWLER_WORKER_MULTIPLIER`
    /// - `TRAWLER_SLEEP_SECS`
    /// - `TRAWLER_DISCOVER_TIMEOUT_SECS`
    /// - `TRAWLER_FAILED_ROOT`
    pub fn from_env(trawl_root: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self::new(trawl_root);

        if let Ok(v) = env::var("TRAWLER_MAX_TRANSFERS") {
            config.max_transfers = parse_var("TRAWLER_MAX_TRANSFERS", &v)?;
        }
        if let Ok(v) = env::var("TRAWLER_WORKER_MULTIPLIER") {
            config.worker_multiplier = parse_var("TRAWLER_WORKER_MULTIPLIER", &v)?;
        }
        if let Ok(v) = env::var("TRAWLER_SLEEP_SECS") {
            config.sleep_interval = Duration::from_secs(parse_var("TRAWLER_SLEEP_SECS", &v)?);
        }
        if let Ok(v) = env::var("TRAWLER_DISCOVER_TIMEOUT_SECS") {
            config.discover_timeout =
                Duration::from_secs(parse_var("TRAWLER_DISCOVER_TIMEOUT_SECS", &v)?);
        }
        if let Ok(v) = env::var("TRAWLER_FAILED_ROOT") {
            config.failed_root = PathBuf::from(v);
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| TrawlError::Config(format!("Invalid value for {}: {}", name, value)))
}

fn default_failed_root(trawl_root: &Path) -> PathBuf {
    match trawl_root.parent() {
        Some(parent) => parent.join("failed"),
        None => trawl_root.join("failed"),
    }
}

/// Object storage connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
        })
    }
}
