//! One trawl cycle
//!
//! A cycle is one full pass over the trawl root: classify and prune, finalize
//! eligible capture blocks in sorted order, then batch the stream payloads
//! through the transfer pool. Everything here runs on the single control
//! task; only the pool fans out.

use crate::catalog::MetadataCatalog;
use crate::config::TrawlConfig;
use crate::extract::MetExtractor;
use crate::factory::ProductFactory;
use crate::ingest::{ingest_capture_block, IngestStatus};
use crate::product::{Discovery, Product};
use crate::store::ObjectStore;
use crate::transfer::TransferPool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use trawler_common::{Result, TrawlError};

/// The trawl engine: configuration plus the three external collaborators.
pub struct Trawler {
    config: TrawlConfig,
    store: Arc<dyn ObjectStore>,
    catalog: Arc<dyn MetadataCatalog>,
    extractor: Arc<dyn MetExtractor>,
    pool: TransferPool,
}

impl Trawler {
    pub fn new(
        config: TrawlConfig,
        store: Arc<dyn ObjectStore>,
        catalog: Arc<dyn MetadataCatalog>,
        extractor: Arc<dyn MetExtractor>,
    ) -> Self {
        let pool = TransferPool::new(
            Arc::clone(&store),
            &config.trawl_root,
            config.worker_multiplier,
        );
        Self {
            config,
            store,
            catalog,
            extractor,
            pool,
        }
    }

    pub fn config(&self) -> &TrawlConfig {
        &self.config
    }

    /// Run one cycle over the trawl root.
    ///
    /// Returns the number of bytes confirmed uploaded; the retry driver
    /// sleeps when a cycle moved nothing.
    pub async fn run_cycle(&self) -> Result<u64> {
        let mut factory = ProductFactory::scan(&self.config.trawl_root)?;
        let total_pruned = factory.prune_capture_blocks();
        info!(
            "A total of {} capture block products will not be transferred this cycle, \
             because the corresponding streams have not completed.",
            total_pruned
        );

        let mut bytes_uploaded = self.process_capture_blocks(&factory).await?;
        bytes_uploaded += self.process_streams(&factory).await?;
        Ok(bytes_uploaded)
    }

    /// Finalize capture blocks in sorted order, stopping at the first failed
    /// ingest so a broken block holds back everything after it.
    async fn process_capture_blocks(&self, factory: &ProductFactory) -> Result<u64> {
        let mut bytes_uploaded = 0;
        for mut product in factory.capture_block_products() {
            let outcome =
                product.discover(&self.config.failed_root, self.config.discover_timeout)?;
            if outcome == Discovery::Quarantined {
                continue;
            }
            if product.completed_and_transferred() {
                product.cleanup()?;
                continue;
            }
            let status = ingest_capture_block(
                &product,
                &self.config.trawl_root,
                self.catalog.as_ref(),
                self.extractor.as_ref(),
                &self.pool,
            )
            .await?;
            match status {
                IngestStatus::Failed => break,
                IngestStatus::Completed { bytes_uploaded: b } => bytes_uploaded += b,
                IngestStatus::Empty => {}
            }
        }
        Ok(bytes_uploaded)
    }

    /// Discover the stream products, clean up the finished ones, and push the
    /// rest's payloads through the pool as one capped batch.
    async fn process_streams(&self, factory: &ProductFactory) -> Result<u64> {
        let mut batch: Vec<PathBuf> = Vec::new();
        let mut batch_size = 0u64;
        let streams = factory
            .l0_stream_products()
            .into_iter()
            .chain(factory.l1_stream_products());
        for mut product in streams {
            let outcome =
                product.discover(&self.config.failed_root, self.config.discover_timeout)?;
            if outcome == Discovery::Quarantined {
                continue;
            }
            if product.completed_and_transferred() {
                product.cleanup()?;
                continue;
            }
            // Products past the cap still get discovered and cleaned up;
            // they just stage nothing this cycle.
            let remaining = self.config.max_transfers.saturating_sub(batch.len());
            batch.extend_from_slice(product.stage_for_transfer(remaining));
            batch_size += product.upload_size();
        }

        if batch.is_empty() {
            debug!("No stream data to upload this cycle");
            return Ok(0);
        }

        debug!(
            "Uploading {:.2} MB of data in {} files",
            batch_size as f64 / 1e6,
            batch.len()
        );
        let outcome = self.pool.upload(batch).await;

        // Route bucket-tagged failures to their product directories first so
        // the diagnostics land even when an untagged error aborts the cycle.
        let mut fatal: Option<TrawlError> = None;
        for err in outcome.failures {
            match err.bucket() {
                Some(bucket) => {
                    Product::set_failed_token(
                        &self.config.trawl_root.join(bucket),
                        &err.to_string(),
                    )?;
                }
                None => fatal = fatal.or(Some(err)),
            }
        }
        if let Some(err) = fatal {
            return Err(err);
        }

        Ok(outcome.bytes_uploaded)
    }

    /// True when both external endpoints answer their probes.
    pub(crate) async fn probe_collaborators(&self) -> bool {
        if let Err(err) = self.store.probe().await {
            debug!("Object store probe failed: {}", err);
            return false;
        }
        if let Err(err) = self.catalog.probe().await {
            debug!("Catalog probe failed: {}", err);
            return false;
        }
        true
    }
}
