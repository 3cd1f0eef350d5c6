//! Trawler Daemon - parallel file uploader trawling capture products into
//! object storage

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use trawler_common::logging::{init_logging, LogConfig, LogLevel};
use trawler_engine::catalog::HttpCatalog;
use trawler_engine::config::{StoreConfig, TrawlConfig};
use trawler_engine::extract::CommandMetExtractor;
use trawler_engine::store::S3Store;
use trawler_engine::{RetryDriver, Trawler};

#[derive(Parser, Debug)]
#[command(name = "trawler-daemon")]
#[command(author, version, about = "Trawl a capture directory into the archive")]
struct Cli {
    /// Directory to trawl for products
    trawl_dir: PathBuf,

    /// S3 gateway endpoint (e.g. http://localhost:7480)
    #[arg(long, env = "S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    /// Metadata catalog endpoint
    #[arg(long, env = "CATALOG_URL", default_value = "http://localhost:8983/catalog")]
    catalog_url: String,

    /// External metadata extractor executable
    #[arg(long, env = "MET_EXTRACTOR", default_value = "met-extract")]
    met_extractor: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env()?;
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    init_logging(&log_config)?;

    if !cli.trawl_dir.is_dir() {
        anyhow::bail!("{} is not a directory", cli.trawl_dir.display());
    }

    let trawl_config = TrawlConfig::from_env(&cli.trawl_dir)?;
    let mut store_config = StoreConfig::from_env()?;
    if let Some(endpoint) = cli.s3_endpoint {
        store_config.endpoint = Some(endpoint);
    }

    info!(
        "Trawling {} into {} (catalog at {})",
        trawl_config.trawl_root.display(),
        store_config
            .endpoint
            .as_deref()
            .unwrap_or("default S3 endpoint"),
        cli.catalog_url
    );

    let store = Arc::new(S3Store::new(store_config));
    let catalog = Arc::new(HttpCatalog::new(cli.catalog_url)?);
    let extractor = Arc::new(CommandMetExtractor::new(cli.met_extractor));

    let trawler = Trawler::new(trawl_config, store, catalog, extractor);

    // Only an unclassified error gets here; the supervisor restarts us.
    RetryDriver::new(trawler).run().await?;
    Ok(())
}
