//! Capture-block ingestion
//!
//! A capture block is finalized by ingesting its RDB metadata pair(s):
//! extract metadata, drive the catalog record through
//! CREATED/TRANSFERRING/RECEIVED, and move the pair into object storage.
//! Pairs are processed in sorted order and the first tagged failure
//! quarantines the block and stops the caller's ordered pass, so a broken
//! early block never lets a later dependent block slip through.

use crate::catalog::{MetadataCatalog, ProductState, RefKind};
use crate::extract::MetExtractor;
use crate::product::Product;
use crate::transfer::{bucket_and_key, TransferPool};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use trawler_common::{Result, TrawlError};

/// Prefix shared by the files of one RDB pair: anything up to and including
/// the "10-digit-id + underscore + token" core, stopping at the first dot.
const RDB_PROD_REGEX: &str = r"^.*[0-9]{10}_[^.]*";

/// Result of one capture block's ingestion pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    /// No payload files discovered; nothing to do this cycle
    Empty,
    /// Every complete RDB pair was ingested
    Completed { bytes_uploaded: u64 },
    /// A pair failed; the block is quarantined and the caller must stop
    /// iterating its sorted list
    Failed,
}

/// Ingest all complete RDB pairs of one capture block, in sorted order.
///
/// A tagged error (extraction failure, RECEIVED guard, bucket permission)
/// writes the failure token into the owning product directory and returns
/// [`IngestStatus::Failed`]. Untagged errors (connectivity, IO) propagate to
/// the retry driver.
pub async fn ingest_capture_block(
    product: &Product,
    trawl_root: &Path,
    catalog: &dyn MetadataCatalog,
    extractor: &dyn MetExtractor,
    pool: &TransferPool,
) -> Result<IngestStatus> {
    if product.file_matches().is_empty() {
        return Ok(IngestStatus::Empty);
    }

    let mut bytes_uploaded = 0;
    for prefix in rdb_pair_prefixes(product.file_matches())? {
        let rdb_lite = PathBuf::from(format!("{}.rdb", prefix));
        let rdb_full = PathBuf::from(format!("{}.full.rdb", prefix));
        if !product.file_matches().contains(&rdb_lite)
            || !product.file_matches().contains(&rdb_full)
        {
            // The pair is still incomplete on disk; leave it for a later
            // cycle.
            continue;
        }

        match ingest_rdb_pair(trawl_root, &rdb_lite, &rdb_full, catalog, extractor, pool).await {
            Ok(bytes) => bytes_uploaded += bytes,
            Err(err) => match err.bucket() {
                Some(bucket) => {
                    error!(
                        "Caught error while ingesting {}: {}",
                        rdb_lite.display(),
                        err
                    );
                    Product::set_failed_token(&trawl_root.join(bucket), &err.to_string())?;
                    return Ok(IngestStatus::Failed);
                }
                None => return Err(err),
            },
        }
    }

    Ok(IngestStatus::Completed { bytes_uploaded })
}

/// Sorted, de-duplicated pair prefixes found among the discovered files.
fn rdb_pair_prefixes(files: &[PathBuf]) -> Result<Vec<String>> {
    let re = Regex::new(RDB_PROD_REGEX).map_err(|e| TrawlError::Config(e.to_string()))?;
    let mut prefixes: Vec<String> = files
        .iter()
        .filter_map(|f| re.find(&f.to_string_lossy()).map(|m| m.as_str().to_string()))
        .collect();
    prefixes.sort();
    prefixes.dedup();
    Ok(prefixes)
}

async fn ingest_rdb_pair(
    trawl_root: &Path,
    rdb_lite: &Path,
    rdb_full: &Path,
    catalog: &dyn MetadataCatalog,
    extractor: &dyn MetExtractor,
    pool: &TransferPool,
) -> Result<u64> {
    let (bucket, _) = bucket_and_key(trawl_root, rdb_lite)?;

    let extracted = extractor
        .extract(rdb_lite, rdb_full)
        .await
        .map_err(|e| e.with_bucket(&bucket))?;

    // The pair prefix relative to the product directory is the product's
    // catalog identity.
    let prod_id = rdb_lite
        .file_name()
        .map(|n| n.to_string_lossy().trim_end_matches(".rdb").to_string())
        .unwrap_or_else(|| bucket.clone());

    let record = match catalog.get_record(&prod_id).await? {
        Some(record) => record,
        None => catalog.create_record(&prod_id, &extracted.product_type).await?,
    };

    // Guard against re-creating a product the archive already holds.
    if record.state == Some(ProductState::Received) {
        return Err(TrawlError::AlreadyReceived {
            product_id: prod_id,
            bucket,
        });
    }

    catalog.set_state(&prod_id, ProductState::Transferring).await?;

    let original_refs = with_common_prefix(&[
        rdb_lite.to_string_lossy().into_owned(),
        rdb_full.to_string_lossy().into_owned(),
    ]);
    catalog
        .attach_refs(&prod_id, RefKind::Original, &original_refs)
        .await?;
    catalog.add_metadata(&prod_id, &extracted.metadata).await?;

    let outcome = pool
        .upload(vec![rdb_lite.to_path_buf(), rdb_full.to_path_buf()])
        .await;
    if let Some(err) = outcome.failures.into_iter().next() {
        return Err(err);
    }

    let datastore_refs = with_common_prefix(&outcome.refs);
    catalog
        .attach_refs(&prod_id, RefKind::Datastore, &datastore_refs)
        .await?;
    catalog.set_state(&prod_id, ProductState::Received).await?;

    info!(
        "{} ingested into archive with datastore refs: {}.",
        prod_id,
        datastore_refs.join(", ")
    );
    Ok(outcome.bytes_uploaded)
}

/// Prepend the references' common directory, conforming to hierarchical
/// product references.
fn with_common_prefix(refs: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(refs.len() + 1);
    if let Some(dir) = common_dir(refs) {
        out.push(dir);
    }
    out.extend_from_slice(refs);
    out
}

/// Directory part of the longest common string prefix of `refs`.
fn common_dir(refs: &[String]) -> Option<String> {
    let first = refs.first()?.as_bytes();
    let mut len = first.len();
    for r in &refs[1..] {
        len = first
            .iter()
            .zip(r.as_bytes())
            .take(len)
            .take_while(|(a, b)| a == b)
            .count();
    }
    let common = &first[..len];
    common
        .iter()
        .rposition(|&b| b == b'/')
        .map(|idx| String::from_utf8_lossy(&common[..idx]).into_owned())
}
