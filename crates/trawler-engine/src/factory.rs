//! Product classification and dependency pruning
//!
//! The factory looks one level below the trawl root and classifies each
//! child directory by name. The three patterns are mutually exclusive, so a
//! directory lands in at most one list. Capture blocks and capture streams
//! are kept apart because they are processed differently: blocks go through
//! metadata ingestion, streams through the batched payload transfer.

use crate::product::{Product, ProductKind};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use trawler_common::{Result, TrawlError};

/// Capture block directories: a 10-digit epoch-derived id.
pub const CAPTURE_BLOCK_REGEX: &str = "^[0-9]{10}$";

/// Raw-visibility stream directories.
pub const CAPTURE_STREAM_L0_REGEX: &str = "^[0-9]{10}[-_].*l0$";

/// Flagged-visibility stream directories.
pub const CAPTURE_STREAM_L1_REGEX: &str = "^[0-9]{10}[-_].*l1-flags$";

/// Classified scan of the trawl root.
#[derive(Debug)]
pub struct ProductFactory {
    capture_block_dirs: Vec<PathBuf>,
    capture_stream_l0_dirs: Vec<PathBuf>,
    capture_stream_l1_dirs: Vec<PathBuf>,
}

impl ProductFactory {
    /// Scan the immediate children of `trawl_root` and classify them by
    /// directory name. No recursion below the first level.
    pub fn scan(trawl_root: &Path) -> Result<Self> {
        Ok(Self {
            capture_block_dirs: list_matching_dirs(trawl_root, CAPTURE_BLOCK_REGEX)?,
            capture_stream_l0_dirs: list_matching_dirs(trawl_root, CAPTURE_STREAM_L0_REGEX)?,
            capture_stream_l1_dirs: list_matching_dirs(trawl_root, CAPTURE_STREAM_L1_REGEX)?,
        })
    }

    /// Drop capture blocks whose dependent streams are still on disk.
    ///
    /// A stream directory is deleted by its own cleanup once fully
    /// transferred, so its continued presence means the block's streams have
    /// not finished and the block must not be finalized yet. This is an
    /// existence check re-evaluated every cycle; the block becomes eligible
    /// automatically once its streams vanish.
    ///
    /// Returns the number of blocks pruned.
    pub fn prune_capture_blocks(&mut self) -> usize {
        let start_count = self.capture_block_dirs.len();
        let streams: Vec<&PathBuf> = self
            .capture_stream_l0_dirs
            .iter()
            .chain(self.capture_stream_l1_dirs.iter())
            .collect();
        self.capture_block_dirs.retain(|cb| {
            let cb_prefix = cb.to_string_lossy();
            !streams
                .iter()
                .any(|cs| cs.to_string_lossy().starts_with(cb_prefix.as_ref()))
        });
        start_count - self.capture_block_dirs.len()
    }

    pub fn capture_block_products(&self) -> Vec<Product> {
        products_for(&self.capture_block_dirs, ProductKind::CaptureBlock)
    }

    pub fn l0_stream_products(&self) -> Vec<Product> {
        products_for(&self.capture_stream_l0_dirs, ProductKind::L0Stream)
    }

    pub fn l1_stream_products(&self) -> Vec<Product> {
        products_for(&self.capture_stream_l1_dirs, ProductKind::L1Stream)
    }
}

fn products_for(dirs: &[PathBuf], kind: ProductKind) -> Vec<Product> {
    dirs.iter().map(|d| Product::new(kind, d)).collect()
}

/// List subdirectories of `trawl_root` whose base name matches `pattern`.
fn list_matching_dirs(trawl_root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let re = Regex::new(pattern).map_err(|e| TrawlError::Config(e.to_string()))?;
    let mut dirs = Vec::new();
    for entry in fs::read_dir(trawl_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if re.is_match(&name.to_string_lossy()) {
            dirs.push(trawl_root.join(name));
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mkdirs(root: &Path, names: &[&str]) {
        for name in names {
            fs::create_dir(root.join(name)).unwrap();
        }
    }

    #[test]
    fn test_scan_classifies_by_pattern() {
        let root = TempDir::new().unwrap();
        mkdirs(
            root.path(),
            &[
                "1000000001",
                "1000000001-sdp_l0",
                "1000000001-sdp_l1-flags",
                "1000000002_sdp_l0",
                "failed",
                "not-a-product",
            ],
        );
        // A stray payload file at the top level is not a product.
        fs::write(root.path().join("1234567890.npy"), b"").unwrap();

        let factory = ProductFactory::scan(root.path()).unwrap();

        assert_eq!(factory.capture_block_products().len(), 1);
        assert_eq!(factory.l0_stream_products().len(), 2);
        assert_eq!(factory.l1_stream_products().len(), 1);
    }

    #[test]
    fn test_patterns_are_mutually_exclusive() {
        let root = TempDir::new().unwrap();
        mkdirs(root.path(), &["1000000001-sdp_l1-flags"]);

        let factory = ProductFactory::scan(root.path()).unwrap();

        assert!(factory.capture_block_products().is_empty());
        assert!(factory.l0_stream_products().is_empty());
        assert_eq!(factory.l1_stream_products().len(), 1);
    }

    #[test]
    fn test_prune_on_l0_stream_presence() {
        let root = TempDir::new().unwrap();
        mkdirs(root.path(), &["1000000001", "1000000001-sdp_l0"]);

        let mut factory = ProductFactory::scan(root.path()).unwrap();
        let pruned = factory.prune_capture_blocks();

        assert_eq!(pruned, 1);
        assert!(factory.capture_block_products().is_empty());
        // The stream itself is still discovered and batched independently.
        assert_eq!(factory.l0_stream_products().len(), 1);
    }

    #[test]
    fn test_prune_is_symmetric_in_stream_kind() {
        let root = TempDir::new().unwrap();
        mkdirs(root.path(), &["2023010100", "2023010100-sdp_l1-flags"]);

        let mut factory = ProductFactory::scan(root.path()).unwrap();
        assert_eq!(factory.prune_capture_blocks(), 1);
    }

    #[test]
    fn test_block_eligible_once_streams_are_gone() {
        let root = TempDir::new().unwrap();
        mkdirs(root.path(), &["1000000001"]);

        let mut factory = ProductFactory::scan(root.path()).unwrap();
        let pruned = factory.prune_capture_blocks();

        assert_eq!(pruned, 0);
        assert_eq!(factory.capture_block_products().len(), 1);
    }

    #[test]
    fn test_prune_only_affects_matching_block() {
        let root = TempDir::new().unwrap();
        mkdirs(
            root.path(),
            &["1000000001", "1000000002", "1000000002-sdp_l0"],
        );

        let mut factory = ProductFactory::scan(root.path()).unwrap();
        let pruned = factory.prune_capture_blocks();

        assert_eq!(pruned, 1);
        let blocks = factory.capture_block_products();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].bucket_name(), "1000000001");
    }
}
