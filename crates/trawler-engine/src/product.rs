//! Product discovery and lifecycle
//!
//! A product is one directory below the trawl root, written by the upstream
//! capture pipeline. Products have no cross-cycle identity: each cycle the
//! factory creates them fresh and re-discovery is the only way progress is
//! observed. The filesystem is the single source of truth.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use trawler_common::Result;
use walkdir::WalkDir;

/// Completion marker filename; presence (not content) marks a product as
/// fully produced.
pub const COMPLETE_TOKEN: &str = "complete";

/// Failure marker filename; content is an optional diagnostic message.
pub const FAILED_TOKEN: &str = "failed";

/// The three product kinds the factory recognises.
///
/// Kind selects the discovery constants (payload extension, in-progress
/// write suffix); capture blocks additionally carry metadata ingestion
/// behavior (see `ingest`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductKind {
    /// A capture block directory holding the RDB metadata pair
    CaptureBlock,
    /// A raw-visibility capture stream
    L0Stream,
    /// A flagged-visibility capture stream
    L1Stream,
}

impl ProductKind {
    /// Payload file suffix for this kind.
    pub fn payload_suffix(self) -> &'static str {
        match self {
            ProductKind::CaptureBlock => ".rdb",
            ProductKind::L0Stream | ProductKind::L1Stream => ".npy",
        }
    }

    /// Suffix of files still being written by the capture pipeline.
    pub fn writing_suffix(self) -> &'static str {
        match self {
            ProductKind::CaptureBlock => ".writing.rdb",
            ProductKind::L0Stream | ProductKind::L1Stream => ".writing.npy",
        }
    }
}

/// Outcome of a discovery pass over one product directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// The directory was scanned (possibly truncated by the time budget)
    Scanned,
    /// A failure token was found and the directory was relocated to the
    /// failed root; the product is permanently excluded
    Quarantined,
}

/// One candidate product directory and its per-cycle state.
#[derive(Debug)]
pub struct Product {
    kind: ProductKind,
    path: PathBuf,
    file_matches: Vec<PathBuf>,
    complete: Option<bool>,
    staged: Vec<PathBuf>,
}

impl Product {
    pub fn new(kind: ProductKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            file_matches: Vec::new(),
            complete: None,
            staged: Vec::new(),
        }
    }

    pub fn kind(&self) -> ProductKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Payload files found by the last discovery pass, in walk order.
    pub fn file_matches(&self) -> &[PathBuf] {
        &self.file_matches
    }

    /// The product's bucket identity: its directory base name.
    pub fn bucket_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Walk the product directory, collecting payload files and looking for
    /// the completion marker.
    ///
    /// If a failure token is present the whole directory is relocated into
    /// `failed_root` and no files are reported; the product is excluded from
    /// all further processing.
    ///
    /// The walk is time-boxed: elapsed time is checked at every directory
    /// boundary and the remainder of the walk is abandoned once
    /// `time_budget` is exceeded. A truncated walk can under-report files or
    /// miss the completion marker, deferring completion detection to a later
    /// cycle; the scan repeats every cycle, so this only delays progress.
    pub fn discover(&mut self, failed_root: &Path, time_budget: Duration) -> Result<Discovery> {
        let start = Instant::now();

        if self.path.join(FAILED_TOKEN).is_file() {
            warn!(
                "{} has a failed token, not processing. Moving to the failed directory.",
                self.path.display()
            );
            self.quarantine(failed_root)?;
            return Ok(Discovery::Quarantined);
        }

        self.complete = Some(false);
        let walker = WalkDir::new(&self.path).sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_dir() {
                // One directory's filenames have been scanned; give up on the
                // rest of the tree once over budget.
                if start.elapsed() > time_budget {
                    warn!(
                        "Discovery of {} exceeded its {:?} budget, deferring the rest to a later cycle.",
                        self.path.display(),
                        time_budget
                    );
                    break;
                }
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.ends_with(self.kind.writing_suffix()) {
                // still being written to; ignore
                continue;
            } else if name.ends_with(self.kind.payload_suffix()) {
                self.file_matches.push(entry.path().to_path_buf());
            } else if name == COMPLETE_TOKEN {
                self.complete = Some(true);
            }
        }

        Ok(Discovery::Scanned)
    }

    /// True when the completion marker is present and no payload files
    /// remain on disk.
    pub fn completed_and_transferred(&self) -> bool {
        self.complete == Some(true) && self.file_matches.is_empty()
    }

    /// Recursively delete the product directory. Only called once
    /// [`Product::completed_and_transferred`] holds.
    pub fn cleanup(&self) -> Result<()> {
        info!(
            "{} is complete. Deleting directory tree.",
            self.path.display()
        );
        fs::remove_dir_all(&self.path)?;
        Ok(())
    }

    /// Select up to `cap` discovered files for this cycle's transfer batch.
    pub fn stage_for_transfer(&mut self, cap: usize) -> &[PathBuf] {
        self.staged = self.file_matches.iter().take(cap).cloned().collect();
        &self.staged
    }

    /// Files selected by the last [`Product::stage_for_transfer`] call.
    pub fn staged(&self) -> &[PathBuf] {
        &self.staged
    }

    /// Total on-disk size of the staged files.
    pub fn upload_size(&self) -> u64 {
        self.staged
            .iter()
            .filter_map(|f| fs::metadata(f).ok())
            .map(|m| m.len())
            .sum()
    }

    fn quarantine(&self, failed_root: &Path) -> Result<()> {
        fs::create_dir_all(failed_root)?;
        let dest = failed_root.join(self.bucket_name());
        fs::rename(&self.path, &dest)?;
        Ok(())
    }

    /// Write a failure token into the given product directory.
    ///
    /// First write wins: an existing token is never overwritten, so the
    /// original diagnostic survives repeated failures.
    pub fn set_failed_token(prod_dir: &Path, msg: &str) -> Result<()> {
        let token = prod_dir.join(FAILED_TOKEN);
        if token.is_file() {
            return Ok(());
        }
        warn!("Writing failed token into {}: {}", prod_dir.display(), msg);
        fs::write(&token, msg)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn budget() -> Duration {
        Duration::from_secs(10)
    }

    fn touch(path: &Path) {
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_discover_collects_payload_and_skips_writing_files() {
        let root = TempDir::new().unwrap();
        let prod = root.path().join("1000000001-sdp_l0");
        fs::create_dir(&prod).unwrap();
        touch(&prod.join("00000.npy"));
        touch(&prod.join("00001.npy"));
        touch(&prod.join("00002.writing.npy"));
        touch(&prod.join("notes.txt"));

        let mut product = Product::new(ProductKind::L0Stream, &prod);
        let outcome = product
            .discover(&root.path().join("failed"), budget())
            .unwrap();

        assert_eq!(outcome, Discovery::Scanned);
        assert_eq!(product.file_matches().len(), 2);
        assert!(product
            .file_matches()
            .iter()
            .all(|f| !f.to_string_lossy().contains("writing")));
        assert!(!product.completed_and_transferred());
    }

    #[test]
    fn test_discover_walks_nested_directories() {
        let root = TempDir::new().unwrap();
        let prod = root.path().join("1000000001-sdp_l0");
        fs::create_dir_all(prod.join("correlator_data")).unwrap();
        touch(&prod.join("correlator_data").join("chunk_0.npy"));

        let mut product = Product::new(ProductKind::L0Stream, &prod);
        product
            .discover(&root.path().join("failed"), budget())
            .unwrap();

        assert_eq!(product.file_matches().len(), 1);
    }

    #[test]
    fn test_complete_token_flips_completion() {
        let root = TempDir::new().unwrap();
        let prod = root.path().join("1000000001-sdp_l0");
        fs::create_dir(&prod).unwrap();
        touch(&prod.join(COMPLETE_TOKEN));

        let mut product = Product::new(ProductKind::L0Stream, &prod);
        product
            .discover(&root.path().join("failed"), budget())
            .unwrap();

        // Completion marker observed and no payload files remain.
        assert!(product.completed_and_transferred());
        product.cleanup().unwrap();
        assert!(!prod.exists());
    }

    #[test]
    fn test_incomplete_without_token() {
        let root = TempDir::new().unwrap();
        let prod = root.path().join("1000000001");
        fs::create_dir(&prod).unwrap();

        let mut product = Product::new(ProductKind::CaptureBlock, &prod);
        product
            .discover(&root.path().join("failed"), budget())
            .unwrap();

        assert!(!product.completed_and_transferred());
    }

    #[test]
    fn test_failed_token_quarantines_product() {
        let root = TempDir::new().unwrap();
        let prod = root.path().join("1000000002");
        fs::create_dir(&prod).unwrap();
        touch(&prod.join("1000000002_sdp_l0.rdb"));
        fs::write(prod.join(FAILED_TOKEN), b"corrupt rdb").unwrap();

        let failed_root = root.path().join("failed");
        let mut product = Product::new(ProductKind::CaptureBlock, &prod);
        let outcome = product.discover(&failed_root, budget()).unwrap();

        assert_eq!(outcome, Discovery::Quarantined);
        assert!(product.file_matches().is_empty());
        assert!(!prod.exists());
        assert!(failed_root.join("1000000002").join(FAILED_TOKEN).is_file());
    }

    #[test]
    fn test_stage_for_transfer_respects_cap() {
        let root = TempDir::new().unwrap();
        let prod = root.path().join("1000000001-sdp_l0");
        fs::create_dir(&prod).unwrap();
        for i in 0..5 {
            touch(&prod.join(format!("{:05}.npy", i)));
        }

        let mut product = Product::new(ProductKind::L0Stream, &prod);
        product
            .discover(&root.path().join("failed"), budget())
            .unwrap();

        assert_eq!(product.stage_for_transfer(3).len(), 3);
        assert_eq!(product.staged().len(), 3);
        assert_eq!(product.stage_for_transfer(100).len(), 5);
    }

    #[test]
    fn test_failed_token_first_write_wins() {
        let root = TempDir::new().unwrap();
        let prod = root.path().join("1000000003");
        fs::create_dir(&prod).unwrap();

        Product::set_failed_token(&prod, "first diagnosis").unwrap();
        Product::set_failed_token(&prod, "second diagnosis").unwrap();

        let content = fs::read_to_string(prod.join(FAILED_TOKEN)).unwrap();
        assert_eq!(content, "first diagnosis");
    }
}
