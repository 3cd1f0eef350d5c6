//! Parallel file transfer
//!
//! A flat file list is partitioned round-robin across worker tasks; each
//! worker opens its own store connection and uploads its partition in list
//! order. A file is deleted locally only after the store confirms a written
//! byte count equal to the file's size; anything else stays on disk for a
//! later cycle. The pool always joins every worker before returning, so a
//! batch is inspected as a whole and never cancelled midway.

use crate::store::{ObjectStore, StoreConnection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};
use trawler_common::{Result, TrawlError};

/// Scheme used for datastore references recorded in the catalog.
pub const REF_SCHEME: &str = "objectstore";

/// Everything one pool invocation produced: datastore references and byte
/// counts for confirmed uploads, and the per-worker errors.
#[derive(Debug, Default)]
pub struct TransferOutcome {
    /// `objectstore://bucket/key` references for confirmed-and-deleted files
    pub refs: Vec<String>,
    /// Total bytes confirmed uploaded
    pub bytes_uploaded: u64,
    /// Worker errors, in no particular order; bucket-tagged ones are routed
    /// to failure tokens by the caller
    pub failures: Vec<TrawlError>,
}

/// Partitions file lists across parallel transfer workers.
pub struct TransferPool {
    store: Arc<dyn ObjectStore>,
    trawl_root: PathBuf,
    worker_multiplier: usize,
}

impl TransferPool {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        trawl_root: impl Into<PathBuf>,
        worker_multiplier: usize,
    ) -> Self {
        Self {
            store,
            trawl_root: trawl_root.into(),
            worker_multiplier,
        }
    }

    /// Upload `files`, blocking until every worker has finished.
    pub async fn upload(&self, files: Vec<PathBuf>) -> TransferOutcome {
        let mut outcome = TransferOutcome::default();
        if files.is_empty() {
            return outcome;
        }

        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let workers = files.len().min(self.worker_multiplier * cpus);
        debug!("Using {} workers for {} files", workers, files.len());

        let mut tasks = JoinSet::new();
        for chunk in partition(&files, workers) {
            let store = Arc::clone(&self.store);
            let trawl_root = self.trawl_root.clone();
            tasks.spawn(async move {
                let conn = store.connect().await?;
                transfer_files(conn, &trawl_root, &chunk).await
            });
        }

        // Join-all: no early cancellation of in-flight workers.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(report)) => {
                    debug!("{} transfers from worker", report.refs.len());
                    outcome.bytes_uploaded += report.bytes_uploaded;
                    outcome.refs.extend(report.refs);
                }
                Ok(Err(err)) => outcome.failures.push(err),
                Err(join_err) => outcome.failures.push(TrawlError::Io(std::io::Error::other(
                    format!("transfer worker panicked: {}", join_err),
                ))),
            }
        }

        outcome
    }
}

#[derive(Debug, Default)]
struct WorkerReport {
    refs: Vec<String>,
    bytes_uploaded: u64,
}

/// Upload one worker's partition in list order over its own connection.
///
/// The worker deletes a file only after the store reports a written byte
/// count equal to the local size; a mismatch is logged and the file is left
/// for the next cycle. The first hard error abandons the rest of the
/// partition.
async fn transfer_files(
    mut conn: Box<dyn StoreConnection>,
    trawl_root: &Path,
    files: &[PathBuf],
) -> Result<WorkerReport> {
    let mut report = WorkerReport::default();
    let mut current_bucket: Option<String> = None;

    for file in files {
        let (bucket, key) = bucket_and_key(trawl_root, file)?;
        if current_bucket.as_deref() != Some(bucket.as_str()) {
            conn.ensure_bucket(&bucket).await?;
            current_bucket = Some(bucket.clone());
        }

        let file_size = fs::metadata(file)?.len();
        let written = conn.put_file(&bucket, &key, file).await?;
        if written == file_size {
            fs::remove_file(file)?;
            report.refs.push(format!("{}://{}/{}", REF_SCHEME, bucket, key));
            report.bytes_uploaded += written;
        } else {
            error!(
                "{} not deleted. Only uploaded {} of {} bytes.",
                file.display(),
                written,
                file_size
            );
        }
    }

    Ok(report)
}

/// Round-robin partition of `files` into exactly `workers` non-overlapping
/// chunks (some possibly empty when `workers > files.len()`).
fn partition(files: &[PathBuf], workers: usize) -> Vec<Vec<PathBuf>> {
    let mut chunks = vec![Vec::new(); workers.max(1)];
    for (i, file) in files.iter().enumerate() {
        chunks[i % workers.max(1)].push(file.clone());
    }
    chunks
}

/// Split a file path below the trawl root into its object storage address:
/// the first component is the bucket, the remainder is the key.
pub fn bucket_and_key(trawl_root: &Path, file: &Path) -> Result<(String, String)> {
    let relative = file.strip_prefix(trawl_root).map_err(|_| {
        TrawlError::Io(std::io::Error::other(format!(
            "{} is not below the trawl root {}",
            file.display(),
            trawl_root.display()
        )))
    })?;

    let mut components = relative.components();
    let bucket = components
        .next()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .filter(|b| !b.is_empty());
    let key = components.as_path().to_string_lossy().into_owned();

    match bucket {
        Some(bucket) if !key.is_empty() => Ok((bucket, key)),
        _ => Err(TrawlError::Io(std::io::Error::other(format!(
            "{} has no bucket/key split below {}",
            file.display(),
            trawl_root.display()
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use tempfile::TempDir;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_partition_covers_every_file_exactly_once() {
        for n in 0..17 {
            for workers in 1..7 {
                let files: Vec<PathBuf> =
                    (0..n).map(|i| PathBuf::from(format!("f{}", i))).collect();
                let chunks = partition(&files, workers);
                assert_eq!(chunks.len(), workers);
                let mut seen: Vec<&PathBuf> = chunks.iter().flatten().collect();
                assert_eq!(seen.len(), n);
                seen.sort();
                seen.dedup();
                assert_eq!(seen.len(), n, "duplicate assignment for n={}", n);
            }
        }
    }

    #[test]
    fn test_partition_is_round_robin() {
        let files = paths(&["a", "b", "c", "d", "e"]);
        let chunks = partition(&files, 2);
        assert_eq!(chunks[0], paths(&["a", "c", "e"]));
        assert_eq!(chunks[1], paths(&["b", "d"]));
    }

    #[test]
    fn test_bucket_and_key_split_on_first_separator() {
        let (bucket, key) = bucket_and_key(
            Path::new("/data/trawl"),
            Path::new("/data/trawl/1000000001-sdp_l0/correlator_data/chunk_0.npy"),
        )
        .unwrap();
        assert_eq!(bucket, "1000000001-sdp_l0");
        assert_eq!(key, "correlator_data/chunk_0.npy");
    }

    #[test]
    fn test_bucket_and_key_rejects_paths_outside_root() {
        assert!(bucket_and_key(Path::new("/data/trawl"), Path::new("/elsewhere/f.npy")).is_err());
        // A file directly in the trawl root has no key.
        assert!(bucket_and_key(Path::new("/data/trawl"), Path::new("/data/trawl/f.npy")).is_err());
    }

    #[tokio::test]
    async fn test_upload_confirms_then_deletes() {
        let root = TempDir::new().unwrap();
        let prod = root.path().join("1000000001-sdp_l0");
        fs::create_dir(&prod).unwrap();
        let file = prod.join("00000.npy");
        fs::write(&file, b"visibilities").unwrap();

        let store = Arc::new(MemoryStore::new());
        let pool = TransferPool::new(store.clone(), root.path(), 10);
        let outcome = pool.upload(vec![file.clone()]).await;

        assert!(outcome.failures.is_empty());
        assert_eq!(
            outcome.refs,
            vec!["objectstore://1000000001-sdp_l0/00000.npy".to_string()]
        );
        assert_eq!(outcome.bytes_uploaded, 12);
        assert!(!file.exists());
        assert_eq!(
            store.object_size("1000000001-sdp_l0", "00000.npy"),
            Some(12)
        );
    }

    #[tokio::test]
    async fn test_short_write_leaves_file_in_place() {
        let root = TempDir::new().unwrap();
        let prod = root.path().join("1000000001-sdp_l0");
        fs::create_dir(&prod).unwrap();
        let file = prod.join("a.npy");
        fs::write(&file, vec![0u8; 100]).unwrap();

        let store = Arc::new(MemoryStore::new().with_short_writes(60));
        let pool = TransferPool::new(store, root.path(), 10);
        let outcome = pool.upload(vec![file.clone()]).await;

        // Soft failure: logged, nothing raised, no reference recorded.
        assert!(outcome.failures.is_empty());
        assert!(outcome.refs.is_empty());
        assert_eq!(outcome.bytes_uploaded, 0);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_permission_conflict_surfaces_bucket_identity() {
        let root = TempDir::new().unwrap();
        let prod = root.path().join("1000000002-sdp_l0");
        fs::create_dir(&prod).unwrap();
        let file = prod.join("a.npy");
        fs::write(&file, b"data").unwrap();

        let store = Arc::new(MemoryStore::new().with_denied_bucket("1000000002-sdp_l0"));
        let pool = TransferPool::new(store, root.path(), 10);
        let outcome = pool.upload(vec![file.clone()]).await;

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].bucket(), Some("1000000002-sdp_l0"));
        // The file is never silently dropped.
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_upload_spans_multiple_buckets() {
        let root = TempDir::new().unwrap();
        let mut files = Vec::new();
        for prod in ["1000000001-sdp_l0", "1000000002-sdp_l0"] {
            let dir = root.path().join(prod);
            fs::create_dir(&dir).unwrap();
            for i in 0..3 {
                let file = dir.join(format!("{:05}.npy", i));
                fs::write(&file, b"x").unwrap();
                files.push(file);
            }
        }

        let store = Arc::new(MemoryStore::new());
        let pool = TransferPool::new(store.clone(), root.path(), 10);
        let outcome = pool.upload(files.clone()).await;

        assert_eq!(outcome.refs.len(), 6);
        assert!(files.iter().all(|f| !f.exists()));
        assert_eq!(store.bucket_count(), 2);
    }
}
